use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use rust_decimal_macros::dec;
use ulid::Ulid;

use staybook::model::*;
use staybook::notify::NotifyHub;
use staybook::{BookingError, Engine, EngineConfig, FixedClock, ValidationError};

// ── Test infrastructure ──────────────────────────────────────

fn start_engine(clock: Arc<FixedClock>) -> (Engine, PathBuf) {
    let dir = std::env::temp_dir().join(format!("staybook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("staybook.wal");
    let engine = Engine::new(EngineConfig::new(&path), clock, Arc::new(NotifyHub::new())).unwrap();
    (engine, path)
}

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 8, 1).unwrap() + Days::new(offset)
}

fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::at_date(day(0)))
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn guest_books_changes_and_cancels() {
    let clock = clock();
    let (engine, _) = start_engine(clock.clone());
    let host = Actor::member(Ulid::new());
    let guest = Actor::member(Ulid::new());

    let unit_id = engine
        .create_unit(
            host.user_id,
            AvailabilityPolicy {
                min_stay: 2,
                ..AvailabilityPolicy::default()
            },
            PricingPolicy::new(dec!(80), dec!(0.125)),
            CancellationPolicy::Moderate,
        )
        .await
        .unwrap();
    let mut events = engine.subscribe(unit_id);

    assert!(engine.query_availability(unit_id, day(20), day(25)).await.unwrap());
    let outcome = engine
        .create_reservation_request(unit_id, guest.user_id, Some(day(20)), Some(day(25)))
        .await
        .unwrap();
    let reservation = engine
        .approve_reservation_request(&host, outcome.request.id)
        .await
        .unwrap();
    assert_eq!(reservation.charges.subtotal, dec!(400));
    assert_eq!(reservation.charges.total, dec!(450.00));
    assert!(!engine.query_availability(unit_id, day(20), day(25)).await.unwrap());

    let change = engine
        .create_change_request(reservation.id, guest.user_id, Some(day(21)), Some(day(24)))
        .await
        .unwrap();
    assert_eq!(change.nights_diff, -2);
    let moved = engine.apply_change_request(&host, change.id).await.unwrap();
    assert_eq!(moved.charges.total, dec!(270.00));

    clock.advance_days(18);
    let quote = engine.refund_quote(reservation.id).await.unwrap();
    assert_eq!(quote.days_before_check_in, 3);
    assert_eq!(quote.rate, RefundRate::Half);

    let cancellation = engine
        .create_cancellation(&guest, reservation.id, Some("flight cancelled".into()))
        .await
        .unwrap();
    assert_eq!(cancellation.refund_amount, dec!(135.00));
    assert!(engine.query_availability(unit_id, day(21), day(24)).await.unwrap());

    let kinds: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
        .map(|e| e.kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            "request_submitted",
            "reservation_confirmed",
            "change_requested",
            "change_applied",
            "reservation_cancelled",
        ]
    );
}

#[tokio::test]
async fn state_survives_restart() {
    let clock = clock();
    let (engine, path) = start_engine(clock.clone());
    let host = Actor::member(Ulid::new());
    let unit_id = engine
        .create_unit(
            host.user_id,
            AvailabilityPolicy {
                instant_booking: true,
                prep_time: 1,
                ..AvailabilityPolicy::default()
            },
            PricingPolicy::new(dec!(150), dec!(0)),
            CancellationPolicy::Firm,
        )
        .await
        .unwrap();
    let outcome = engine
        .create_reservation_request(unit_id, Ulid::new(), Some(day(10)), Some(day(12)))
        .await
        .unwrap();
    let reservation = outcome.reservation.unwrap();
    engine.compact_wal().await.unwrap();
    engine.block_dates(&host, unit_id, day(20), day(22)).await.unwrap();
    drop(engine);

    let engine = Engine::new(EngineConfig::new(&path), clock, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.get_reservation(reservation.id).await.unwrap(), reservation);
    let err = engine
        .create_reservation_request(unit_id, Ulid::new(), Some(day(12)), Some(day(14)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BookingError::Validation(ValidationError::OverlapsReservation { .. })
    ));
    assert_eq!(
        engine.free_ranges(unit_id, day(8), day(24), None).await.unwrap(),
        vec![
            DateSpan::new(day(8), day(10)),
            DateSpan::new(day(13), day(20)),
            DateSpan::new(day(23), day(24)),
        ]
    );
}
