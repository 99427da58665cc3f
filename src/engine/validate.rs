use chrono::NaiveDate;
use ulid::Ulid;

use crate::config::PrepBuffer;
use crate::model::*;

use super::ValidationError;

/// Does `proposed` collide with `existing` once the unit's prep time is applied?
///
/// `existing` is widened by the prep padding, then the stay collides if its
/// check-in falls inside the guarded range, its check-out falls inside it, or
/// it covers the guarded range entirely.
pub fn collides(existing: &DateSpan, proposed: &DateSpan, prep_time: u32, mode: PrepBuffer) -> bool {
    let (before, after) = mode.padding(prep_time);
    let guarded = existing.widen(before, after);
    let starts_inside = guarded.start <= proposed.start && proposed.start < guarded.end;
    let ends_inside = guarded.start < proposed.end && proposed.end <= guarded.end;
    let covers = proposed.start <= guarded.start && guarded.end <= proposed.end;
    starts_inside || ends_inside || covers
}

/// Check a proposed stay against a unit snapshot.
///
/// Runs, in order: both dates present, check-in after `today`, check-out after
/// check-in, no collision with an active reservation (other than `exclude`),
/// no collision with a blocked period, stay length within the unit's bounds,
/// and notice within the unit's bounds. Returns the stay on success.
pub fn validate_window(
    unit: &UnitState,
    check_in: Option<NaiveDate>,
    check_out: Option<NaiveDate>,
    exclude: Option<Ulid>,
    today: NaiveDate,
    mode: PrepBuffer,
) -> Result<DateSpan, ValidationError> {
    let (Some(check_in), Some(check_out)) = (check_in, check_out) else {
        return Err(ValidationError::MissingDates);
    };
    if check_in <= today {
        return Err(ValidationError::CheckInNotInFuture);
    }
    let span =
        DateSpan::checked(check_in, check_out).ok_or(ValidationError::CheckOutNotAfterCheckIn)?;

    let policy = &unit.availability;
    let prep = policy.prep_time;
    // Any entry whose guarded range can reach `span` overlaps this window.
    let (before, after) = mode.padding(prep);
    let search = span.widen(after, before);

    for entry in unit.overlapping(&search) {
        if let Some(reservation_id) = entry.reservation_id()
            && Some(reservation_id) != exclude
            && collides(&entry.span, &span, prep, mode)
        {
            return Err(ValidationError::OverlapsReservation {
                reservation_id,
                span: entry.span,
            });
        }
    }
    for entry in unit.overlapping(&search) {
        if entry.is_blocked() && collides(&entry.span, &span, prep, mode) {
            return Err(ValidationError::OverlapsBlocked {
                entry_id: entry.id,
                span: entry.span,
            });
        }
    }

    let nights = span.nights();
    if nights < i64::from(policy.min_stay) {
        return Err(ValidationError::StayTooShort {
            nights,
            min: policy.min_stay,
        });
    }
    if nights > i64::from(policy.max_stay) {
        return Err(ValidationError::StayTooLong {
            nights,
            max: policy.max_stay,
        });
    }

    let days = (check_in - today).num_days();
    if days < i64::from(policy.min_notice) {
        return Err(ValidationError::NoticeTooShort {
            days,
            min: policy.min_notice,
        });
    }
    if days > i64::from(policy.max_notice) {
        return Err(ValidationError::NoticeTooLong {
            days,
            max: policy.max_notice,
        });
    }

    Ok(span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, Utc};
    use rust_decimal_macros::dec;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 8, 1).unwrap()
    }

    fn day(offset: u64) -> NaiveDate {
        today() + Days::new(offset)
    }

    fn span(a: u64, b: u64) -> DateSpan {
        DateSpan::new(day(a), day(b))
    }

    fn unit_with(availability: AvailabilityPolicy) -> UnitState {
        UnitState::new(
            Ulid::new(),
            Ulid::new(),
            availability,
            PricingPolicy::new(dec!(100), dec!(0.1)),
            CancellationPolicy::Flexible,
        )
    }

    fn add_entry(unit: &mut UnitState, reason: EntryReason, s: DateSpan) -> Ulid {
        let id = Ulid::new();
        unit.insert_entry(CalendarEntry {
            id,
            unit_id: unit.id,
            reason,
            span: s,
            created_at: Utc::now(),
        });
        id
    }

    fn add_stay(unit: &mut UnitState, s: DateSpan) -> Ulid {
        let reservation_id = Ulid::new();
        add_entry(unit, EntryReason::Reservation { reservation_id }, s);
        reservation_id
    }

    fn check(unit: &UnitState, a: u64, b: u64) -> Result<DateSpan, ValidationError> {
        validate_window(unit, Some(day(a)), Some(day(b)), None, today(), PrepBuffer::Trailing)
    }

    #[test]
    fn collides_three_clauses() {
        let existing = span(10, 15);
        let m = PrepBuffer::Trailing;
        assert!(collides(&existing, &span(12, 20), 0, m)); // check-in inside
        assert!(collides(&existing, &span(5, 11), 0, m)); // check-out inside
        assert!(collides(&existing, &span(5, 20), 0, m)); // covers
        assert!(collides(&existing, &span(11, 13), 0, m)); // inside
        assert!(!collides(&existing, &span(15, 18), 0, m)); // back-to-back after
        assert!(!collides(&existing, &span(7, 10), 0, m)); // back-to-back before
    }

    #[test]
    fn trailing_prep_guards_after_checkout_only() {
        let existing = span(10, 15);
        let m = PrepBuffer::Trailing;
        assert!(collides(&existing, &span(15, 18), 2, m));
        assert!(collides(&existing, &span(16, 18), 2, m));
        assert!(!collides(&existing, &span(17, 19), 2, m));
        // Ending exactly at the existing check-in is allowed.
        assert!(!collides(&existing, &span(7, 10), 2, m));
    }

    #[test]
    fn symmetric_prep_guards_both_sides() {
        let existing = span(10, 15);
        let m = PrepBuffer::Symmetric;
        assert!(collides(&existing, &span(7, 10), 2, m));
        assert!(collides(&existing, &span(5, 9), 2, m));
        assert!(!collides(&existing, &span(5, 8), 2, m));
        assert!(!collides(&existing, &span(17, 19), 2, m));
    }

    #[test]
    fn collision_is_symmetric_without_prep() {
        let spans = [span(1, 4), span(3, 6), span(4, 8), span(2, 9), span(9, 10), span(5, 6)];
        for a in &spans {
            for b in &spans {
                for m in [PrepBuffer::Trailing, PrepBuffer::Symmetric] {
                    assert_eq!(collides(a, b, 0, m), collides(b, a, 0, m), "{a} vs {b}");
                    assert_eq!(collides(a, b, 0, m), a.overlaps(b), "{a} vs {b}");
                }
            }
        }
    }

    #[test]
    fn collision_is_symmetric_in_symmetric_mode() {
        let spans = [span(1, 4), span(5, 6), span(6, 8), span(8, 12), span(14, 15)];
        for prep in 0..=5 {
            for a in &spans {
                for b in &spans {
                    assert_eq!(
                        collides(a, b, prep, PrepBuffer::Symmetric),
                        collides(b, a, prep, PrepBuffer::Symmetric),
                        "{a} vs {b} prep {prep}"
                    );
                }
            }
        }
    }

    #[test]
    fn missing_dates_checked_first() {
        let unit = unit_with(AvailabilityPolicy::default());
        let r = validate_window(&unit, Some(day(5)), None, None, today(), PrepBuffer::Trailing);
        assert_eq!(r, Err(ValidationError::MissingDates));
        let r = validate_window(&unit, None, Some(day(5)), None, today(), PrepBuffer::Trailing);
        assert_eq!(r, Err(ValidationError::MissingDates));
    }

    #[test]
    fn check_in_must_be_after_today() {
        let unit = unit_with(AvailabilityPolicy::default());
        assert_eq!(check(&unit, 0, 3), Err(ValidationError::CheckInNotInFuture));
        let past = validate_window(
            &unit,
            Some(today() - Days::new(3)),
            Some(day(2)),
            None,
            today(),
            PrepBuffer::Trailing,
        );
        assert_eq!(past, Err(ValidationError::CheckInNotInFuture));
    }

    #[test]
    fn check_out_must_follow_check_in() {
        let unit = unit_with(AvailabilityPolicy::default());
        assert_eq!(check(&unit, 5, 5), Err(ValidationError::CheckOutNotAfterCheckIn));
        assert_eq!(check(&unit, 5, 3), Err(ValidationError::CheckOutNotAfterCheckIn));
    }

    #[test]
    fn reservation_overlap_reported_before_block() {
        let mut unit = unit_with(AvailabilityPolicy::default());
        add_entry(&mut unit, EntryReason::Blocked, span(4, 6));
        let rid = add_stay(&mut unit, span(8, 10));
        assert_eq!(
            check(&unit, 5, 9),
            Err(ValidationError::OverlapsReservation {
                reservation_id: rid,
                span: span(8, 10)
            })
        );
    }

    #[test]
    fn earliest_conflicting_reservation_reported() {
        let mut unit = unit_with(AvailabilityPolicy::default());
        let later = add_stay(&mut unit, span(12, 14));
        let earlier = add_stay(&mut unit, span(6, 8));
        let err = check(&unit, 5, 13).unwrap_err();
        assert_eq!(
            err,
            ValidationError::OverlapsReservation {
                reservation_id: earlier,
                span: span(6, 8)
            }
        );
        assert_ne!(earlier, later);
    }

    #[test]
    fn blocked_period_rejects() {
        let mut unit = unit_with(AvailabilityPolicy::default());
        let bid = add_entry(&mut unit, EntryReason::Blocked, span(4, 6));
        assert_eq!(
            check(&unit, 5, 8),
            Err(ValidationError::OverlapsBlocked {
                entry_id: bid,
                span: span(4, 6)
            })
        );
        assert!(check(&unit, 6, 8).is_ok());
    }

    #[test]
    fn excluded_reservation_is_ignored() {
        let mut unit = unit_with(AvailabilityPolicy::default());
        let rid = add_stay(&mut unit, span(5, 8));
        assert!(check(&unit, 6, 9).is_err());
        let r = validate_window(
            &unit,
            Some(day(6)),
            Some(day(9)),
            Some(rid),
            today(),
            PrepBuffer::Trailing,
        );
        assert_eq!(r, Ok(span(6, 9)));
    }

    #[test]
    fn prep_time_applies_after_existing_checkout() {
        let mut unit = unit_with(AvailabilityPolicy {
            prep_time: 2,
            ..Default::default()
        });
        add_stay(&mut unit, span(5, 8));
        assert!(check(&unit, 9, 11).is_err());
        assert!(check(&unit, 10, 12).is_ok());
    }

    #[test]
    fn stay_length_bounds() {
        let unit = unit_with(AvailabilityPolicy {
            min_stay: 3,
            max_stay: 10,
            ..Default::default()
        });
        assert_eq!(
            check(&unit, 5, 7),
            Err(ValidationError::StayTooShort { nights: 2, min: 3 })
        );
        assert_eq!(
            check(&unit, 5, 16),
            Err(ValidationError::StayTooLong { nights: 11, max: 10 })
        );
        assert!(check(&unit, 5, 8).is_ok());
        assert!(check(&unit, 5, 15).is_ok());
    }

    #[test]
    fn notice_bounds() {
        let unit = unit_with(AvailabilityPolicy {
            min_notice: 3,
            max_notice: 60,
            ..Default::default()
        });
        assert_eq!(
            check(&unit, 2, 5),
            Err(ValidationError::NoticeTooShort { days: 2, min: 3 })
        );
        assert_eq!(
            check(&unit, 61, 63),
            Err(ValidationError::NoticeTooLong { days: 61, max: 60 })
        );
        assert!(check(&unit, 3, 5).is_ok());
        assert!(check(&unit, 60, 62).is_ok());
    }

    #[test]
    fn stay_checked_before_notice() {
        let unit = unit_with(AvailabilityPolicy {
            min_stay: 3,
            min_notice: 5,
            ..Default::default()
        });
        assert!(matches!(
            check(&unit, 1, 2),
            Err(ValidationError::StayTooShort { .. })
        ));
    }
}
