//! Stale reservation sweep

use std::time::Duration;

use campus_loans::{
    models::{EntityType, NotificationKind, ReservationStatus},
    services::sweeper::spawn_expiry_sweep,
};

use crate::common::{day, Ledger};

#[tokio::test]
async fn sweep_expires_only_stale_pending_and_approved() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let tripod = ledger.asset("TRI-001").await;

    let pending = ledger.request(&ledger.alice, &camera, 1, 2).await;
    let approved = ledger.approved(&ledger.bob, &camera, 2, 3).await;
    let denied = ledger.request(&ledger.alice, &camera, 1, 2).await;
    ledger
        .services
        .reservations
        .deny(ledger.admin.id, denied.id, "duplicate")
        .await
        .unwrap();
    let cancelled = ledger.request(&ledger.bob, &camera, 3, 4).await;
    ledger
        .services
        .reservations
        .cancel(ledger.bob.id, cancelled.id)
        .await
        .unwrap();
    let confirmed = ledger.approved(&ledger.alice, &tripod, 0, 2).await;
    ledger
        .services
        .loans
        .checkout_from_reservation(ledger.admin.id, confirmed.id)
        .await
        .unwrap();
    let future = ledger.request(&ledger.alice, &camera, 10, 11).await;

    ledger.clock.set(day(5));
    let expired = ledger.services.reservations.expire_stale().await.unwrap();
    assert_eq!(expired, 2);

    let status = |id| {
        let reservations = ledger.services.reservations.clone();
        async move { reservations.get(id).await.unwrap().status }
    };
    assert_eq!(status(pending.id).await, ReservationStatus::Expired);
    assert_eq!(status(approved.id).await, ReservationStatus::Expired);
    assert_eq!(status(denied.id).await, ReservationStatus::Denied);
    assert_eq!(status(cancelled.id).await, ReservationStatus::Cancelled);
    assert_eq!(status(confirmed.id).await, ReservationStatus::Confirmed);
    assert_eq!(status(future.id).await, ReservationStatus::Pending);

    // The second sweep finds nothing left to do
    assert_eq!(ledger.services.reservations.expire_stale().await.unwrap(), 0);
}

#[tokio::test]
async fn window_ending_exactly_now_is_stale() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let reservation = ledger.request(&ledger.alice, &camera, 1, 2).await;

    ledger.clock.set(day(2) - chrono::Duration::seconds(1));
    assert_eq!(ledger.services.reservations.expire_stale().await.unwrap(), 0);

    ledger.clock.set(day(2));
    assert_eq!(ledger.services.reservations.expire_stale().await.unwrap(), 1);
    let reservation = ledger.services.reservations.get(reservation.id).await.unwrap();
    assert_eq!(reservation.status, ReservationStatus::Expired);
}

#[tokio::test]
async fn each_expired_reservation_notifies_its_requester() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let mine = ledger.request(&ledger.alice, &camera, 1, 2).await;
    let theirs = ledger.approved(&ledger.bob, &camera, 2, 3).await;

    ledger.clock.set(day(4));
    ledger.services.reservations.expire_stale().await.unwrap();

    for (user, reservation) in [(&ledger.alice, &mine), (&ledger.bob, &theirs)] {
        let expired: Vec<_> = ledger
            .services
            .notifications
            .list_for_recipient(user.id, false)
            .await
            .unwrap()
            .into_iter()
            .filter(|n| n.kind == NotificationKind::ReservationExpired)
            .collect();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].payload["reservation_id"], reservation.id);

        let history = ledger
            .services
            .audit
            .history(EntityType::Reservation, reservation.id)
            .await
            .unwrap();
        let last = history.last().unwrap();
        assert_eq!(last.action, "expired");
        assert_eq!(last.actor_id, None);
    }
}

#[tokio::test]
async fn expired_approval_releases_the_window() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    ledger.approved(&ledger.alice, &camera, 1, 3).await;

    ledger.clock.set(day(3));
    ledger.services.reservations.expire_stale().await.unwrap();

    // Overlapping request for the same (now past) window can be approved again
    let retry = ledger.approved(&ledger.bob, &camera, 2, 4).await;
    assert_eq!(retry.status, ReservationStatus::Approved);
}

#[tokio::test(start_paused = true)]
async fn background_sweep_expires_on_its_next_tick() {
    let ledger = Ledger::new().await;
    let camera = ledger.asset("CAM-001").await;
    let stale = ledger.approved(&ledger.alice, &camera, 1, 2).await;

    let period = Duration::from_secs(60);
    let sweep = spawn_expiry_sweep(ledger.services.reservations.clone(), period);

    // The first tick fires at once, while the window is still ahead
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        ledger.services.reservations.get(stale.id).await.unwrap().status,
        ReservationStatus::Approved
    );

    ledger.clock.set(day(3));
    tokio::time::sleep(period).await;
    assert_eq!(
        ledger.services.reservations.get(stale.id).await.unwrap().status,
        ReservationStatus::Expired
    );

    sweep.abort();
    assert!(sweep.await.unwrap_err().is_cancelled());
}
