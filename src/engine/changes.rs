use chrono::NaiveDate;
use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::pricing::compute_charges;
use super::{BookingError, Engine, require_host, require_owner};

fn active_reservation(us: &UnitState, id: Ulid) -> Result<&Reservation, BookingError> {
    let reservation = us.reservations.get(&id).ok_or(BookingError::NotFound(id))?;
    if !reservation.is_active() {
        return Err(BookingError::Conflict {
            id,
            reason: "reservation is cancelled",
        });
    }
    Ok(reservation)
}

fn pending_change(us: &UnitState, id: Ulid) -> Result<&ChangeRequest, BookingError> {
    let change = us.changes.get(&id).ok_or(BookingError::NotFound(id))?;
    match change.status {
        ChangeStatus::Pending => Ok(change),
        ChangeStatus::Applied => Err(BookingError::Conflict {
            id,
            reason: "change already applied",
        }),
        ChangeStatus::Withdrawn => Err(BookingError::Conflict {
            id,
            reason: "change was withdrawn",
        }),
    }
}

impl Engine {
    /// Guest proposes new dates for their reservation. The reservation's own
    /// nights don't count against the new dates.
    pub async fn create_change_request(
        &self,
        reservation_id: Ulid,
        user_id: Ulid,
        new_check_in: Option<NaiveDate>,
        new_check_out: Option<NaiveDate>,
    ) -> Result<ChangeRequest, BookingError> {
        let mut guard = self.resolve_entity_write(&reservation_id).await?;
        let reservation = guard
            .reservations
            .get(&reservation_id)
            .ok_or(BookingError::NotFound(reservation_id))?;
        if reservation.user_id != user_id {
            return Err(BookingError::Forbidden {
                user_id,
                action: "change another guest's reservation",
            });
        }
        let current_nights = active_reservation(&guard, reservation_id)?.span.nights();
        let span = self.validate_stay(&guard, new_check_in, new_check_out, Some(reservation_id))?;

        let change = ChangeRequest {
            id: Ulid::new(),
            unit_id: guard.id,
            reservation_id,
            user_id,
            span,
            nights_diff: span.nights() - current_nights,
            status: ChangeStatus::Pending,
            created_at: self.now(),
        };
        let event = Event::ChangeRequested {
            change: change.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(change_id = %change.id, %reservation_id, %span, "change requested");
        Ok(change)
    }

    /// Host applies a pending change: dates re-validated, charges recomputed
    /// from current pricing, reservation and calendar entry moved together.
    pub async fn apply_change_request(
        &self,
        actor: &Actor,
        change_id: Ulid,
    ) -> Result<Reservation, BookingError> {
        let mut guard = self.resolve_entity_write(&change_id).await?;
        require_host(&guard, actor, "apply change requests")?;
        let change = pending_change(&guard, change_id)?.clone();
        active_reservation(&guard, change.reservation_id)?;
        let span = self.validate_stay(
            &guard,
            Some(change.span.start),
            Some(change.span.end),
            Some(change.reservation_id),
        )?;

        let charges = compute_charges(&guard.pricing, &span)?;
        let event = Event::ChangeApplied {
            id: change_id,
            unit_id: guard.id,
            reservation_id: change.reservation_id,
            span,
            charges,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::CHANGES_APPLIED_TOTAL).increment(1);
        info!(
            %change_id,
            reservation_id = %change.reservation_id,
            %span,
            total = %charges.total,
            "change applied"
        );
        guard
            .reservations
            .get(&change.reservation_id)
            .cloned()
            .ok_or(BookingError::NotFound(change.reservation_id))
    }

    pub async fn withdraw_change_request(
        &self,
        actor: &Actor,
        change_id: Ulid,
    ) -> Result<(), BookingError> {
        let mut guard = self.resolve_entity_write(&change_id).await?;
        let change = pending_change(&guard, change_id)?;
        require_owner(change.user_id, actor, "withdraw this change")?;
        let event = Event::ChangeWithdrawn {
            id: change_id,
            unit_id: guard.id,
        };
        self.persist_and_apply(&mut guard, &event).await
    }
}
