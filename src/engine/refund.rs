use chrono::{DateTime, Duration, Utc};

use crate::model::{CancellationPolicy, RefundRate, Reservation};

/// Cancellations filed within this many days of booking may qualify for a full refund.
pub const GRACE_PERIOD_DAYS: i64 = 2;

/// Nights a stay needs for the long-term policies to apply.
pub const LONG_TERM_MIN_NIGHTS: i64 = 28;

/// Facts about a cancellation that the refund rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundContext {
    /// Whole days from the cancellation date to check-in. Negative once the stay has begun.
    pub days_before_check_in: i64,
    pub nights: i64,
    pub within_grace: bool,
}

impl RefundContext {
    pub fn new(reservation: &Reservation, cancelled_at: DateTime<Utc>) -> Self {
        let since_booking = cancelled_at - reservation.created_at;
        Self {
            days_before_check_in: (reservation.check_in() - cancelled_at.date_naive()).num_days(),
            nights: reservation.span.nights(),
            within_grace: since_booking >= Duration::zero()
                && since_booking <= Duration::days(GRACE_PERIOD_DAYS),
        }
    }
}

type RefundRule = fn(&RefundContext) -> RefundRate;

fn rule_for(policy: CancellationPolicy) -> RefundRule {
    match policy {
        CancellationPolicy::Flexible => flexible,
        CancellationPolicy::Moderate => moderate,
        CancellationPolicy::Firm => firm,
        CancellationPolicy::Strict => strict,
        CancellationPolicy::FirmLongTerm => firm_long_term,
        CancellationPolicy::StrictLongTerm => strict_long_term,
        CancellationPolicy::SuperStrict30 => super_strict_30,
        CancellationPolicy::NonRefundable => non_refundable,
    }
}

/// Refund owed under `policy`. Nothing is refunded once the stay has started.
pub fn compute_refund(policy: CancellationPolicy, ctx: &RefundContext) -> RefundRate {
    if ctx.days_before_check_in < 0 {
        return RefundRate::Nothing;
    }
    rule_for(policy)(ctx)
}

fn flexible(ctx: &RefundContext) -> RefundRate {
    if ctx.days_before_check_in == 0 {
        RefundRate::Nothing
    } else {
        RefundRate::Full
    }
}

fn moderate(ctx: &RefundContext) -> RefundRate {
    match ctx.days_before_check_in {
        d if d >= 5 => RefundRate::Full,
        d if d >= 1 => RefundRate::Half,
        _ => RefundRate::Nothing,
    }
}

fn firm(ctx: &RefundContext) -> RefundRate {
    let d = ctx.days_before_check_in;
    if d >= 30 || (d >= 14 && ctx.within_grace) {
        RefundRate::Full
    } else if d >= 7 {
        RefundRate::Half
    } else {
        RefundRate::Nothing
    }
}

fn strict(ctx: &RefundContext) -> RefundRate {
    let d = ctx.days_before_check_in;
    if d >= 14 && ctx.within_grace {
        RefundRate::Full
    } else if d >= 7 {
        RefundRate::Half
    } else {
        RefundRate::Nothing
    }
}

// Long-term policies only bind stays of 28+ nights; shorter stays get the
// matching standard policy.
fn firm_long_term(ctx: &RefundContext) -> RefundRate {
    if ctx.nights < LONG_TERM_MIN_NIGHTS {
        return firm(ctx);
    }
    if ctx.days_before_check_in >= 30 {
        RefundRate::Full
    } else {
        RefundRate::Nothing
    }
}

fn strict_long_term(ctx: &RefundContext) -> RefundRate {
    if ctx.nights < LONG_TERM_MIN_NIGHTS {
        return strict(ctx);
    }
    if ctx.days_before_check_in >= 28 && ctx.within_grace {
        RefundRate::Full
    } else {
        RefundRate::Nothing
    }
}

fn super_strict_30(ctx: &RefundContext) -> RefundRate {
    if ctx.days_before_check_in >= 30 {
        RefundRate::Half
    } else {
        RefundRate::Nothing
    }
}

fn non_refundable(_: &RefundContext) -> RefundRate {
    RefundRate::Nothing
}
