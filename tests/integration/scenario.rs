//! Reserve, approve, check out and return late: the whole lifecycle in one go

use rust_decimal::Decimal;

use campus_loans::models::{loan::ReturnLoan, AssetStatus, EntityType, ReservationStatus};

use crate::common::{day, t0, Ledger};

#[tokio::test]
async fn reserve_checkout_and_return_two_days_late() {
    let ledger = Ledger::new().await;
    let asset = ledger.asset("A").await;

    let reservation = ledger.request(&ledger.alice, &asset, 1, 8).await;
    assert_eq!(reservation.status, ReservationStatus::Pending);

    let reservation = ledger
        .services
        .reservations
        .approve(ledger.admin.id, reservation.id, None)
        .await
        .unwrap();
    assert_eq!(reservation.status, ReservationStatus::Approved);

    let loan = ledger
        .services
        .loans
        .checkout_from_reservation(ledger.admin.id, reservation.id)
        .await
        .unwrap();
    assert_eq!(loan.due_at, t0() + chrono::Duration::days(7));
    assert_eq!(
        ledger.services.reservations.get(reservation.id).await.unwrap().status,
        ReservationStatus::Confirmed
    );
    assert_eq!(
        ledger.services.inventory.get(asset.id).await.unwrap().status,
        AssetStatus::CheckedOut
    );

    ledger.clock.set(day(9));
    let outcome = ledger
        .services
        .loans
        .return_loan(ledger.admin.id, loan.id, ReturnLoan::default())
        .await
        .unwrap();

    assert_eq!(outcome.loan.return_at, Some(day(9)));
    assert_eq!(
        ledger.services.inventory.get(asset.id).await.unwrap().status,
        AssetStatus::Available
    );
    let penalties = ledger.services.loans.penalties_for_loan(loan.id).await.unwrap();
    assert_eq!(penalties.len(), 1);
    assert_eq!(penalties[0].amount, Decimal::from(20));
    assert_eq!(outcome.penalty, Some(penalties[0].clone()));

    // The confirmed reservation is out of the sweep's reach
    assert_eq!(ledger.services.reservations.expire_stale().await.unwrap(), 0);

    let loan_actions: Vec<String> = ledger
        .services
        .audit
        .history(EntityType::Loan, loan.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(loan_actions, ["checked_out", "returned"]);
}
