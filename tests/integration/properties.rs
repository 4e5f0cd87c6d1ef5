//! Property-based checks for booking exclusion and penalty arithmetic

use chrono::Duration;
use proptest::prelude::*;
use rust_decimal::Decimal;

use campus_loans::{
    models::ReservationStatus,
    services::penalties::{compute_penalty, days_late},
    AppError,
};

use crate::common::{t0, Ledger};

/// Strategy for a reservation window in hours after day 0: start in the first
/// two days, between one hour and half a day long
fn window_strategy() -> impl Strategy<Value = (i64, i64)> {
    (0i64..48, 1i64..12).prop_map(|(start, len)| (start, start + len))
}

fn overlaps(a: (i64, i64), b: (i64, i64)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Approving requests in arrival order keeps exactly the windows that do
    /// not clash with an earlier approved one, and rejects the rest as overlaps
    #[test]
    fn approvals_never_double_book(windows in prop::collection::vec(window_strategy(), 1..12)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let ledger = Ledger::new().await;
            let camera = ledger.asset("CAM-001").await;

            let mut kept: Vec<(i64, i64)> = Vec::new();
            for window in &windows {
                let request = ledger
                    .services
                    .reservations
                    .request(campus_loans::models::reservation::RequestReservation {
                        requester_id: ledger.alice.id,
                        asset_id: camera.id,
                        start_at: t0() + Duration::hours(window.0),
                        end_at: t0() + Duration::hours(window.1),
                    })
                    .await
                    .unwrap();
                let outcome = ledger
                    .services
                    .reservations
                    .approve(ledger.admin.id, request.id, None)
                    .await;

                let clashes = kept.iter().any(|k| overlaps(*k, *window));
                if clashes {
                    assert!(matches!(outcome, Err(AppError::ReservationOverlap { .. })), "{:?}", outcome);
                } else {
                    assert!(outcome.is_ok(), "{:?}", outcome);
                    kept.push(*window);
                }
            }

            let approved: Vec<_> = ledger
                .services
                .reservations
                .list_for_asset(camera.id)
                .await
                .unwrap()
                .into_iter()
                .filter(|r| r.status == ReservationStatus::Approved)
                .collect();
            assert_eq!(approved.len(), kept.len());
            for (i, a) in approved.iter().enumerate() {
                for b in &approved[i + 1..] {
                    assert!(!a.overlaps(b.start_at, b.end_at), "{} overlaps {}", a.id, b.id);
                }
            }
        });
    }

    /// The fee is the started-day count times the rate, and never negative
    #[test]
    fn penalty_is_started_days_times_rate(
        offset_secs in -200_000i64..2_000_000,
        rate_cents in 0i64..10_000,
    ) {
        let due = t0();
        let returned = due + Duration::seconds(offset_secs);
        let rate = Decimal::new(rate_cents, 2);

        let amount = compute_penalty(due, returned, rate);
        let expected_days = if offset_secs <= 0 { 0 } else { (offset_secs + 86_399) / 86_400 };

        prop_assert_eq!(days_late(due, returned), expected_days);
        prop_assert_eq!(amount, Decimal::from(expected_days) * rate);
        prop_assert!(amount >= Decimal::ZERO);
    }

    /// Returning later never costs less
    #[test]
    fn penalty_is_monotonic(first in 0i64..1_000_000, extra in 0i64..1_000_000) {
        let due = t0();
        let rate = Decimal::from(10);
        let earlier = compute_penalty(due, due + Duration::seconds(first), rate);
        let later = compute_penalty(due, due + Duration::seconds(first + extra), rate);
        prop_assert!(later >= earlier);
    }
}
