use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::pricing::compute_charges;
use super::{BookingError, Engine, require_host, require_owner};

/// Build the event that materializes a reservation and its calendar entry.
fn confirmation(
    us: &UnitState,
    user_id: Ulid,
    span: DateSpan,
    request: Option<ReservationRequest>,
    now: DateTime<Utc>,
) -> Result<(Reservation, Event), BookingError> {
    let entry_id = Ulid::new();
    let reservation = Reservation {
        id: Ulid::new(),
        unit_id: us.id,
        request_id: request.as_ref().map(|r| r.id),
        user_id,
        span,
        calendar_entry_id: entry_id,
        charges: compute_charges(&us.pricing, &span)?,
        status: ReservationStatus::Active,
        created_at: now,
    };
    let entry = CalendarEntry {
        id: entry_id,
        unit_id: us.id,
        reason: EntryReason::Reservation {
            reservation_id: reservation.id,
        },
        span,
        created_at: now,
    };
    let event = Event::ReservationConfirmed {
        reservation: reservation.clone(),
        entry,
        request,
    };
    Ok((reservation, event))
}

fn ensure_calendar_room(us: &UnitState) -> Result<(), BookingError> {
    if us.calendar.len() >= MAX_CALENDAR_ENTRIES_PER_UNIT {
        return Err(BookingError::LimitExceeded("too many calendar entries on unit"));
    }
    Ok(())
}

fn pending_request(us: &UnitState, id: Ulid) -> Result<&ReservationRequest, BookingError> {
    let request = us.requests.get(&id).ok_or(BookingError::NotFound(id))?;
    match request.status {
        RequestStatus::Pending => Ok(request),
        RequestStatus::Approved => Err(BookingError::Conflict {
            id,
            reason: "request already approved",
        }),
        RequestStatus::Withdrawn => Err(BookingError::Conflict {
            id,
            reason: "request was withdrawn",
        }),
    }
}

impl Engine {
    /// Submit a guest's reservation request. On an instant-booking unit the
    /// reservation is confirmed in the same step.
    pub async fn create_reservation_request(
        &self,
        unit_id: Ulid,
        user_id: Ulid,
        check_in: Option<NaiveDate>,
        check_out: Option<NaiveDate>,
    ) -> Result<RequestOutcome, BookingError> {
        let mut guard = self.lock_unit(unit_id).await?;
        let pending = guard
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending)
            .count();
        if pending >= MAX_PENDING_REQUESTS_PER_UNIT {
            return Err(BookingError::LimitExceeded("too many pending requests on unit"));
        }

        let span = match self.validate_stay(&guard, check_in, check_out, None) {
            Ok(span) => span,
            Err(e) => {
                metrics::counter!(crate::observability::REQUESTS_TOTAL, "outcome" => "rejected")
                    .increment(1);
                return Err(e);
            }
        };

        let now = self.now();
        let mut request = ReservationRequest {
            id: Ulid::new(),
            unit_id,
            user_id,
            span,
            status: RequestStatus::Pending,
            created_at: now,
        };

        if !guard.availability.instant_booking {
            let event = Event::RequestSubmitted {
                request: request.clone(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            metrics::counter!(crate::observability::REQUESTS_TOTAL, "outcome" => "pending")
                .increment(1);
            info!(request_id = %request.id, %unit_id, %span, "reservation request pending");
            return Ok(RequestOutcome {
                request,
                reservation: None,
            });
        }

        ensure_calendar_room(&guard)?;
        request.status = RequestStatus::Approved;
        let (reservation, event) = confirmation(&guard, user_id, span, Some(request.clone()), now)?;
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::REQUESTS_TOTAL, "outcome" => "instant").increment(1);
        metrics::counter!(crate::observability::RESERVATIONS_CONFIRMED_TOTAL, "source" => "instant")
            .increment(1);
        info!(
            reservation_id = %reservation.id,
            %unit_id,
            %span,
            total = %reservation.charges.total,
            "reservation confirmed instantly"
        );
        Ok(RequestOutcome {
            request,
            reservation: Some(reservation),
        })
    }

    /// Move a pending request to new dates.
    pub async fn update_reservation_request(
        &self,
        actor: &Actor,
        request_id: Ulid,
        check_in: Option<NaiveDate>,
        check_out: Option<NaiveDate>,
    ) -> Result<ReservationRequest, BookingError> {
        let mut guard = self.resolve_entity_write(&request_id).await?;
        let request = pending_request(&guard, request_id)?;
        require_owner(request.user_id, actor, "edit this request")?;
        let span = self.validate_stay(&guard, check_in, check_out, None)?;

        let event = Event::RequestRescheduled {
            id: request_id,
            unit_id: guard.id,
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .requests
            .get(&request_id)
            .cloned()
            .ok_or(BookingError::NotFound(request_id))
    }

    pub async fn withdraw_reservation_request(
        &self,
        actor: &Actor,
        request_id: Ulid,
    ) -> Result<(), BookingError> {
        let mut guard = self.resolve_entity_write(&request_id).await?;
        let request = pending_request(&guard, request_id)?;
        require_owner(request.user_id, actor, "withdraw this request")?;
        let event = Event::RequestWithdrawn {
            id: request_id,
            unit_id: guard.id,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Host approval of a pending request. Dates are re-validated under the
    /// unit lock, so two requests for the same nights cannot both be approved.
    pub async fn approve_reservation_request(
        &self,
        actor: &Actor,
        request_id: Ulid,
    ) -> Result<Reservation, BookingError> {
        let mut guard = self.resolve_entity_write(&request_id).await?;
        require_host(&guard, actor, "approve requests")?;
        let mut request = pending_request(&guard, request_id)?.clone();
        ensure_calendar_room(&guard)?;
        let span = self.validate_stay(&guard, Some(request.check_in()), Some(request.check_out()), None)?;

        request.status = RequestStatus::Approved;
        let user_id = request.user_id;
        let (reservation, event) = confirmation(&guard, user_id, span, Some(request), self.now())?;
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CONFIRMED_TOTAL, "source" => "approval")
            .increment(1);
        info!(
            reservation_id = %reservation.id,
            %request_id,
            %span,
            total = %reservation.charges.total,
            "reservation request approved"
        );
        Ok(reservation)
    }

    /// Admin-only booking on a guest's behalf, without a request.
    pub async fn create_reservation(
        &self,
        actor: &Actor,
        unit_id: Ulid,
        guest_id: Ulid,
        check_in: Option<NaiveDate>,
        check_out: Option<NaiveDate>,
    ) -> Result<Reservation, BookingError> {
        if !actor.is_admin() {
            return Err(BookingError::Forbidden {
                user_id: actor.user_id,
                action: "create reservations directly",
            });
        }
        let mut guard = self.lock_unit(unit_id).await?;
        ensure_calendar_room(&guard)?;
        let span = self.validate_stay(&guard, check_in, check_out, None)?;

        let (reservation, event) = confirmation(&guard, guest_id, span, None, self.now())?;
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(crate::observability::RESERVATIONS_CONFIRMED_TOTAL, "source" => "admin")
            .increment(1);
        info!(reservation_id = %reservation.id, %unit_id, %span, "reservation created by admin");
        Ok(reservation)
    }
}
