use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::free_ranges;
use super::refund::{RefundContext, compute_refund};
use super::validate::validate_window;
use super::{BookingError, Engine, ValidationError};

impl Engine {
    /// Could this stay be booked right now? Validation failures read as `false`;
    /// unknown units and lock timeouts are still errors.
    pub async fn query_availability(
        &self,
        unit_id: Ulid,
        check_in: NaiveDate,
        check_out: NaiveDate,
    ) -> Result<bool, BookingError> {
        match self.check_window(unit_id, Some(check_in), Some(check_out), None).await {
            Ok(_) => Ok(true),
            Err(BookingError::Validation(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Run the full window validator without booking anything.
    pub async fn check_window(
        &self,
        unit_id: Ulid,
        check_in: Option<NaiveDate>,
        check_out: Option<NaiveDate>,
        exclude_reservation: Option<Ulid>,
    ) -> Result<DateSpan, BookingError> {
        let guard = self.read_unit(unit_id).await?;
        validate_window(
            &guard,
            check_in,
            check_out,
            exclude_reservation,
            self.today(),
            self.config.prep_buffer,
        )
        .map_err(BookingError::Validation)
    }

    /// Free ranges in `[from, to)`, optionally keeping only those of at least `min_nights`.
    pub async fn free_ranges(
        &self,
        unit_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        min_nights: Option<u32>,
    ) -> Result<Vec<DateSpan>, BookingError> {
        let window = DateSpan::checked(from, to)
            .ok_or(BookingError::Validation(ValidationError::CheckOutNotAfterCheckIn))?;
        if window.nights() > MAX_QUERY_WINDOW_DAYS {
            return Err(BookingError::LimitExceeded("query window too wide"));
        }
        let guard = self.read_unit(unit_id).await?;
        let mut free = free_ranges(&guard, &window, self.config.prep_buffer);
        if let Some(min) = min_nights {
            free.retain(|span| span.nights() >= i64::from(min));
        }
        Ok(free)
    }

    pub async fn unit_info(&self, unit_id: Ulid) -> Result<UnitInfo, BookingError> {
        Ok(self.read_unit(unit_id).await?.info())
    }

    pub async fn list_units(&self) -> Result<Vec<UnitInfo>, BookingError> {
        let ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read_unit(id).await {
                Ok(guard) => out.push(guard.info()),
                // Deleted since the id snapshot.
                Err(BookingError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        out.sort_by_key(|u| u.id);
        Ok(out)
    }

    pub async fn calendar(&self, unit_id: Ulid) -> Result<Vec<CalendarEntry>, BookingError> {
        Ok(self.read_unit(unit_id).await?.calendar.clone())
    }

    /// All reservations of a unit, cancelled ones included, oldest first.
    pub async fn reservations_for_unit(&self, unit_id: Ulid) -> Result<Vec<Reservation>, BookingError> {
        let guard = self.read_unit(unit_id).await?;
        Ok(guard.reservations.values().cloned().collect())
    }

    pub async fn pending_requests(&self, unit_id: Ulid) -> Result<Vec<ReservationRequest>, BookingError> {
        let guard = self.read_unit(unit_id).await?;
        Ok(guard
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .cloned()
            .collect())
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, BookingError> {
        let guard = self.resolve_entity_read(&id).await?;
        guard.reservations.get(&id).cloned().ok_or(BookingError::NotFound(id))
    }

    pub async fn get_reservation_request(&self, id: Ulid) -> Result<ReservationRequest, BookingError> {
        let guard = self.resolve_entity_read(&id).await?;
        guard.requests.get(&id).cloned().ok_or(BookingError::NotFound(id))
    }

    pub async fn get_change_request(&self, id: Ulid) -> Result<ChangeRequest, BookingError> {
        let guard = self.resolve_entity_read(&id).await?;
        guard.changes.get(&id).cloned().ok_or(BookingError::NotFound(id))
    }

    pub async fn get_cancellation(&self, id: Ulid) -> Result<CancellationRequest, BookingError> {
        let guard = self.resolve_entity_read(&id).await?;
        guard.cancellations.get(&id).cloned().ok_or(BookingError::NotFound(id))
    }

    /// Change requests filed against a reservation, oldest first.
    pub async fn changes_for_reservation(
        &self,
        reservation_id: Ulid,
    ) -> Result<Vec<ChangeRequest>, BookingError> {
        let guard = self.resolve_entity_read(&reservation_id).await?;
        if !guard.reservations.contains_key(&reservation_id) {
            return Err(BookingError::NotFound(reservation_id));
        }
        Ok(guard
            .changes
            .values()
            .filter(|c| c.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    /// What cancelling the reservation now would refund, without cancelling it.
    pub async fn refund_quote(&self, reservation_id: Ulid) -> Result<RefundQuote, BookingError> {
        let guard = self.resolve_entity_read(&reservation_id).await?;
        let reservation = guard
            .reservations
            .get(&reservation_id)
            .ok_or(BookingError::NotFound(reservation_id))?;
        if !reservation.is_active() {
            return Err(BookingError::Conflict {
                id: reservation_id,
                reason: "reservation already cancelled",
            });
        }
        let policy = guard.cancellation_policy;
        let ctx = RefundContext::new(reservation, self.now());
        let rate = compute_refund(policy, &ctx);
        Ok(RefundQuote {
            reservation_id,
            policy,
            days_before_check_in: ctx.days_before_check_in,
            within_grace: ctx.within_grace,
            rate,
            amount: rate.amount(reservation.charges.total),
        })
    }
}
