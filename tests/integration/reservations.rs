//! Reservation state machine

use campus_loans::{
    models::{reservation::RequestReservation, EntityType, NotificationKind, ReservationStatus},
    AppError,
};

use crate::common::{day, Ledger};

#[tokio::test]
async fn request_starts_pending_and_notifies_requester() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;

    let reservation = ledger.request(&ledger.alice, &camera, 1, 8).await;

    assert_eq!(reservation.status, ReservationStatus::Pending);
    assert_eq!(reservation.start_at, day(1));
    assert_eq!(reservation.end_at, day(8));

    let inbox = ledger
        .services
        .notifications
        .list_for_recipient(ledger.alice.id, false)
        .await
        .unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].kind, NotificationKind::ReservationRequested);
    assert_eq!(inbox[0].payload["reservation_id"], reservation.id);

    let history = ledger
        .services
        .audit
        .history(EntityType::Reservation, reservation.id)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].action, "requested");
    assert_eq!(history[0].actor_id, Some(ledger.alice.id));
}

#[tokio::test]
async fn request_rejects_empty_or_inverted_interval() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;

    for (start, end) in [(day(2), day(2)), (day(3), day(2))] {
        let err = ledger
            .services
            .reservations
            .request(RequestReservation {
                requester_id: ledger.alice.id,
                asset_id: camera.id,
                start_at: start,
                end_at: end,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInterval), "{:?}", err);
    }

    let mine = ledger
        .services
        .reservations
        .list_for_requester(ledger.alice.id)
        .await
        .unwrap();
    assert!(mine.is_empty());
}

#[tokio::test]
async fn request_for_unknown_asset_is_not_found() {
    let ledger = Ledger::new().await;

    let err = ledger
        .services
        .reservations
        .request(RequestReservation {
            requester_id: ledger.alice.id,
            asset_id: 999,
            start_at: day(1),
            end_at: day(2),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn overlapping_pending_requests_are_accepted() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;

    ledger.request(&ledger.alice, &camera, 1, 5).await;
    ledger.request(&ledger.bob, &camera, 2, 6).await;

    let all = ledger.services.reservations.list_for_asset(camera.id).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|r| r.status == ReservationStatus::Pending));
}

#[tokio::test]
async fn first_approval_wins_an_overlapping_window() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;

    let first = ledger.request(&ledger.alice, &camera, 1, 5).await;
    let second = ledger.request(&ledger.bob, &camera, 4, 6).await;

    let approved = ledger
        .services
        .reservations
        .approve(ledger.admin.id, first.id, Some("course project".to_string()))
        .await
        .unwrap();
    assert_eq!(approved.status, ReservationStatus::Approved);
    assert_eq!(approved.decided_by, Some(ledger.admin.id));
    assert_eq!(approved.decision_reason.as_deref(), Some("course project"));

    let err = ledger
        .services
        .reservations
        .approve(ledger.admin.id, second.id, None)
        .await
        .unwrap_err();
    assert!(
        matches!(err, AppError::ReservationOverlap { reservation_id, asset_id } if reservation_id == second.id && asset_id == camera.id)
    );

    // Nothing was written for the rejected approval
    let second = ledger.services.reservations.get(second.id).await.unwrap();
    assert_eq!(second.status, ReservationStatus::Pending);
    assert_eq!(second.decided_by, None);
}

#[tokio::test]
async fn back_to_back_windows_do_not_overlap() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;

    ledger.approved(&ledger.alice, &camera, 1, 3).await;
    let adjacent = ledger.approved(&ledger.bob, &camera, 3, 5).await;

    assert_eq!(adjacent.status, ReservationStatus::Approved);
}

#[tokio::test]
async fn same_window_on_another_asset_is_independent() {
    let ledger = Ledger::new().await;
    let first = ledger.asset("CAM-001").await;
    let second = ledger.asset("CAM-002").await;

    ledger.approved(&ledger.alice, &first, 1, 5).await;
    let other = ledger.approved(&ledger.bob, &second, 1, 5).await;

    assert_eq!(other.status, ReservationStatus::Approved);
}

#[tokio::test]
async fn reapproval_is_idempotent() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let reservation = ledger.approved(&ledger.alice, &camera, 1, 5).await;

    let again = ledger
        .services
        .reservations
        .approve(ledger.bob.id, reservation.id, Some("second look".to_string()))
        .await
        .unwrap();
    assert_eq!(again.status, ReservationStatus::Approved);
    assert_eq!(again.decided_by, Some(ledger.bob.id));

    let approvals = ledger
        .services
        .notifications
        .list_for_recipient(ledger.alice.id, false)
        .await
        .unwrap()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::ReservationApproved)
        .count();
    assert_eq!(approvals, 1);

    let actions: Vec<String> = ledger
        .services
        .audit
        .history(EntityType::Reservation, reservation.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions, ["requested", "approved", "reapproved"]);
}

#[tokio::test]
async fn approving_a_confirmed_reservation_changes_nothing() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let reservation = ledger.approved(&ledger.alice, &camera, 0, 5).await;
    ledger
        .services
        .loans
        .checkout_from_reservation(ledger.admin.id, reservation.id)
        .await
        .unwrap();

    let same = ledger
        .services
        .reservations
        .approve(ledger.bob.id, reservation.id, None)
        .await
        .unwrap();
    assert_eq!(same.status, ReservationStatus::Confirmed);
    assert_eq!(same.decided_by, Some(ledger.admin.id));
}

#[tokio::test]
async fn approving_a_denied_reservation_is_an_invalid_transition() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let reservation = ledger.request(&ledger.alice, &camera, 1, 5).await;
    ledger
        .services
        .reservations
        .deny(ledger.admin.id, reservation.id, "lab closed")
        .await
        .unwrap();

    let err = ledger
        .services
        .reservations
        .approve(ledger.admin.id, reservation.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition { .. }));
    assert_eq!(err.to_string(), "Cannot approve reservation in status denied");
}

#[tokio::test]
async fn unknown_reservation_is_not_found() {
    let ledger = Ledger::new().await;

    let err = ledger
        .services
        .reservations
        .approve(ledger.admin.id, 404, None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ReservationNotFound(404)));
}

#[tokio::test]
async fn deny_requires_a_reason() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let reservation = ledger.request(&ledger.alice, &camera, 1, 5).await;

    for blank in ["", "   "] {
        let err = ledger
            .services
            .reservations
            .deny(ledger.admin.id, reservation.id, blank)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingReason));
    }

    let denied = ledger
        .services
        .reservations
        .deny(ledger.admin.id, reservation.id, "  under repair  ")
        .await
        .unwrap();
    assert_eq!(denied.status, ReservationStatus::Denied);
    assert_eq!(denied.decision_reason.as_deref(), Some("under repair"));

    let inbox = ledger
        .services
        .notifications
        .list_for_recipient(ledger.alice.id, false)
        .await
        .unwrap();
    let notice = inbox
        .iter()
        .find(|n| n.kind == NotificationKind::ReservationDenied)
        .unwrap();
    assert_eq!(notice.payload["reason"], "under repair");
}

#[tokio::test]
async fn deny_only_applies_to_pending_requests() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let reservation = ledger.approved(&ledger.alice, &camera, 1, 5).await;

    let err = ledger
        .services
        .reservations
        .deny(ledger.admin.id, reservation.id, "changed my mind")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn only_the_requester_may_cancel() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let reservation = ledger.approved(&ledger.alice, &camera, 1, 5).await;

    for intruder in [&ledger.bob, &ledger.admin] {
        let err = ledger
            .services
            .reservations
            .cancel(intruder.id, reservation.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Ownership(id) if id == reservation.id));
    }

    let cancelled = ledger
        .services
        .reservations
        .cancel(ledger.alice.id, reservation.id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, ReservationStatus::Cancelled);

    let inbox = ledger
        .services
        .notifications
        .list_for_recipient(ledger.alice.id, false)
        .await
        .unwrap();
    assert!(inbox.iter().any(|n| n.kind == NotificationKind::ReservationCancelled));
}

#[tokio::test]
async fn cancel_is_refused_once_the_window_starts() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let reservation = ledger.approved(&ledger.alice, &camera, 1, 5).await;

    ledger.clock.set(day(1));
    let err = ledger
        .services
        .reservations
        .cancel(ledger.alice.id, reservation.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AlreadyStarted(id) if id == reservation.id));

    let unchanged = ledger.services.reservations.get(reservation.id).await.unwrap();
    assert_eq!(unchanged.status, ReservationStatus::Approved);
}

#[tokio::test]
async fn cancelling_twice_is_an_invalid_transition() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let reservation = ledger.request(&ledger.alice, &camera, 1, 5).await;

    ledger
        .services
        .reservations
        .cancel(ledger.alice.id, reservation.id)
        .await
        .unwrap();
    let err = ledger
        .services
        .reservations
        .cancel(ledger.alice.id, reservation.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn cancelling_frees_the_window() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;

    let first = ledger.approved(&ledger.alice, &camera, 1, 5).await;
    let second = ledger.request(&ledger.bob, &camera, 2, 4).await;

    ledger
        .services
        .reservations
        .cancel(ledger.alice.id, first.id)
        .await
        .unwrap();
    let approved = ledger
        .services
        .reservations
        .approve(ledger.admin.id, second.id, None)
        .await
        .unwrap();
    assert_eq!(approved.status, ReservationStatus::Approved);
}
