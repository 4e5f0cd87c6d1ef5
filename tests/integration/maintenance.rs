//! Maintenance tickets

use chrono::Duration;

use campus_loans::{
    models::{
        loan::ReturnLoan, maintenance::OpenTicket, AssetStatus, NotificationKind, TicketSeverity,
        TicketStatus,
    },
    AppError,
};

use crate::common::{day, Ledger};

fn ticket_for(asset_id: i32, loan_id: Option<i32>, description: &str) -> OpenTicket {
    OpenTicket {
        asset_id,
        loan_id,
        severity: TicketSeverity::High,
        description: description.to_string(),
    }
}

#[tokio::test]
async fn only_technicians_can_be_assigned() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let ticket = ledger
        .services
        .maintenance
        .open_ticket(ledger.admin.id, ticket_for(camera.id, None, "sensor dust"))
        .await
        .unwrap();
    assert_eq!(ticket.status, TicketStatus::Open);

    let err = ledger
        .services
        .maintenance
        .assign_ticket(ledger.admin.id, ticket.id, ledger.bob.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotTechnician(id) if id == ledger.bob.id));

    let assigned = ledger
        .services
        .maintenance
        .assign_ticket(ledger.admin.id, ticket.id, ledger.tech.id)
        .await
        .unwrap();
    assert_eq!(assigned.assigned_to, Some(ledger.tech.id));
    assert_eq!(assigned.status, TicketStatus::Open);

    let inbox = ledger
        .services
        .notifications
        .list_for_recipient(ledger.tech.id, true)
        .await
        .unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::TicketAssigned);
    assert_eq!(inbox[0].payload["ticket_id"], ticket.id);
}

#[tokio::test]
async fn closing_the_last_ticket_returns_the_asset_to_service() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let loan = ledger
        .services
        .loans
        .checkout_adhoc(ledger.admin.id, ledger.alice.id, camera.id)
        .await
        .unwrap();
    let outcome = ledger
        .services
        .loans
        .return_loan(
            ledger.admin.id,
            loan.id,
            ReturnLoan {
                damaged: true,
                condition_notes: None,
            },
        )
        .await
        .unwrap();
    let damage = outcome.ticket.unwrap();
    let extra = ledger
        .services
        .maintenance
        .open_ticket(ledger.tech.id, ticket_for(camera.id, None, "battery swelling"))
        .await
        .unwrap();

    ledger.clock.set(day(3));
    let closed = ledger
        .services
        .maintenance
        .update_ticket_status(ledger.tech.id, damage.id, TicketStatus::Closed)
        .await
        .unwrap();
    assert_eq!(closed.closed_at, Some(day(3)));

    // Another ticket is still open on the asset
    let camera_now = ledger.services.inventory.get(camera.id).await.unwrap();
    assert_eq!(camera_now.status, AssetStatus::OutOfService);
    assert_eq!(camera_now.last_serviced_at, Some(day(3)));

    ledger.clock.advance(Duration::hours(4));
    ledger
        .services
        .maintenance
        .update_ticket_status(ledger.tech.id, extra.id, TicketStatus::InProgress)
        .await
        .unwrap();
    ledger
        .services
        .maintenance
        .update_ticket_status(ledger.tech.id, extra.id, TicketStatus::Closed)
        .await
        .unwrap();

    let camera_now = ledger.services.inventory.get(camera.id).await.unwrap();
    assert_eq!(camera_now.status, AssetStatus::Available);
    assert_eq!(camera_now.last_serviced_at, Some(day(3) + Duration::hours(4)));
    assert!(ledger.services.inventory.is_available(camera.id).await.unwrap());
}

#[tokio::test]
async fn closing_a_ticket_leaves_a_retired_asset_retired() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let ticket = ledger
        .services
        .maintenance
        .open_ticket(ledger.admin.id, ticket_for(camera.id, None, "beyond repair"))
        .await
        .unwrap();
    ledger
        .services
        .inventory
        .set_status(ledger.admin.id, camera.id, AssetStatus::Retired)
        .await
        .unwrap();

    ledger
        .services
        .maintenance
        .update_ticket_status(ledger.admin.id, ticket.id, TicketStatus::Closed)
        .await
        .unwrap();
    let camera = ledger.services.inventory.get(camera.id).await.unwrap();
    assert_eq!(camera.status, AssetStatus::Retired);
}

#[tokio::test]
async fn closed_tickets_are_terminal() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let ticket = ledger
        .services
        .maintenance
        .open_ticket(ledger.admin.id, ticket_for(camera.id, None, "loose strap"))
        .await
        .unwrap();
    ledger
        .services
        .maintenance
        .update_ticket_status(ledger.admin.id, ticket.id, TicketStatus::Closed)
        .await
        .unwrap();

    let err = ledger
        .services
        .maintenance
        .update_ticket_status(ledger.admin.id, ticket.id, TicketStatus::Open)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition { .. }));

    let err = ledger
        .services
        .maintenance
        .assign_ticket(ledger.admin.id, ticket.id, ledger.tech.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn loan_tickets_are_deduplicated() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let loan = ledger
        .services
        .loans
        .checkout_adhoc(ledger.admin.id, ledger.alice.id, camera.id)
        .await
        .unwrap();
    let outcome = ledger
        .services
        .loans
        .return_loan(
            ledger.admin.id,
            loan.id,
            ReturnLoan {
                damaged: true,
                condition_notes: Some("scratched".to_string()),
            },
        )
        .await
        .unwrap();
    let auto = outcome.ticket.unwrap();

    let manual = ledger
        .services
        .maintenance
        .open_ticket(ledger.tech.id, ticket_for(camera.id, Some(loan.id), "scratched body"))
        .await
        .unwrap();
    assert_eq!(manual.id, auto.id);
    assert_eq!(
        ledger.services.maintenance.list_for_asset(camera.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn ticket_loan_must_match_its_asset() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let tripod = ledger.asset("TRI-001").await;
    let loan = ledger
        .services
        .loans
        .checkout_adhoc(ledger.admin.id, ledger.alice.id, camera.id)
        .await
        .unwrap();

    let err = ledger
        .services
        .maintenance
        .open_ticket(ledger.admin.id, ticket_for(tripod.id, Some(loan.id), "wobbly leg"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = ledger
        .services
        .maintenance
        .open_ticket(ledger.admin.id, ticket_for(tripod.id, None, "  "))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}
