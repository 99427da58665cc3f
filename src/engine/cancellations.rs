use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::refund::{RefundContext, compute_refund};
use super::{BookingError, Engine, require_owner};

impl Engine {
    /// Cancel a reservation. The refund comes from the unit's current policy;
    /// the reservation is voided and its calendar entry released in one event.
    pub async fn create_cancellation(
        &self,
        actor: &Actor,
        reservation_id: Ulid,
        reason: Option<String>,
    ) -> Result<CancellationRequest, BookingError> {
        let reason = reason.unwrap_or_default();
        if reason.len() > MAX_REASON_LEN {
            return Err(BookingError::LimitExceeded("cancellation reason too long"));
        }
        let mut guard = self.resolve_entity_write(&reservation_id).await?;
        let reservation = guard
            .reservations
            .get(&reservation_id)
            .ok_or(BookingError::NotFound(reservation_id))?;
        require_owner(reservation.user_id, actor, "cancel this reservation")?;
        if !reservation.is_active() {
            return Err(BookingError::Conflict {
                id: reservation_id,
                reason: "reservation already cancelled",
            });
        }

        let now = self.now();
        let policy = guard.cancellation_policy;
        let ctx = RefundContext::new(reservation, now);
        let refund = compute_refund(policy, &ctx);
        let cancellation = CancellationRequest {
            id: Ulid::new(),
            unit_id: guard.id,
            reservation_id,
            user_id: actor.user_id,
            reason,
            policy,
            days_before_check_in: ctx.days_before_check_in,
            refund,
            refund_amount: refund.amount(reservation.charges.total),
            created_at: now,
        };
        let event = Event::ReservationCancelled {
            cancellation: cancellation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;

        metrics::counter!(
            crate::observability::CANCELLATIONS_TOTAL,
            "policy" => policy.as_str(),
            "refund" => refund_label(refund)
        )
        .increment(1);
        info!(
            %reservation_id,
            %policy,
            days_before_check_in = ctx.days_before_check_in,
            refund = %cancellation.refund_amount,
            "reservation cancelled"
        );
        Ok(cancellation)
    }
}

fn refund_label(rate: RefundRate) -> &'static str {
    match rate {
        RefundRate::Nothing => "none",
        RefundRate::Half => "half",
        RefundRate::Full => "full",
    }
}
