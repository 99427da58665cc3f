use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{RwLock, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{BookingError, Engine, ValidationError, WalCommand, require_host, unindex_unit};

fn block_span(start: NaiveDate, end: NaiveDate) -> Result<DateSpan, BookingError> {
    let span = DateSpan::checked(start, end)
        .ok_or(BookingError::Validation(ValidationError::CheckOutNotAfterCheckIn))?;
    if span.nights() > MAX_BLOCK_DAYS {
        return Err(BookingError::LimitExceeded("block too long"));
    }
    Ok(span)
}

/// Blocks may not sit on top of anything already on the calendar.
fn ensure_calendar_free(us: &UnitState, span: &DateSpan, ignore: Option<Ulid>) -> Result<(), BookingError> {
    match us.overlapping(span).find(|e| Some(e.id) != ignore) {
        Some(entry) => Err(BookingError::Conflict {
            id: entry.id,
            reason: "dates already on the calendar",
        }),
        None => Ok(()),
    }
}

fn blocked_entry(us: &UnitState, id: Ulid) -> Result<&CalendarEntry, BookingError> {
    let entry = us.entry(id).ok_or(BookingError::NotFound(id))?;
    if !entry.is_blocked() {
        return Err(BookingError::Conflict {
            id,
            reason: "reservation dates change only through the reservation",
        });
    }
    Ok(entry)
}

impl Engine {
    pub async fn create_unit(
        &self,
        host_id: Ulid,
        availability: AvailabilityPolicy,
        pricing: PricingPolicy,
        cancellation_policy: CancellationPolicy,
    ) -> Result<Ulid, BookingError> {
        availability.validate().map_err(BookingError::InvalidPolicy)?;
        pricing.validate().map_err(BookingError::InvalidPolicy)?;

        // Exclusive so that the count check and the insert are one step.
        let _catalog = self.catalog.write().await;
        if self.state.len() >= self.config.max_units {
            return Err(BookingError::LimitExceeded("too many units"));
        }
        let id = Ulid::new();
        let event = Event::UnitCreated {
            id,
            host_id,
            availability,
            pricing,
            cancellation_policy,
        };
        self.wal_append(&event).await?;
        let us = UnitState::new(id, host_id, availability, pricing, cancellation_policy);
        self.state.insert(id, Arc::new(RwLock::new(us)));
        self.notify.send(id, &event);
        metrics::gauge!(crate::observability::UNITS_ACTIVE).set(self.state.len() as f64);
        info!(unit_id = %id, %host_id, "unit created");
        Ok(id)
    }

    /// Remove a unit. Refused while it has an active reservation.
    pub async fn delete_unit(&self, actor: &Actor, unit_id: Ulid) -> Result<(), BookingError> {
        let _catalog = self.catalog.read().await;
        let guard = self.lock_unit(unit_id).await?;
        require_host(&guard, actor, "delete this unit")?;
        if let Some(active) = guard.active_reservations().next() {
            return Err(BookingError::Conflict {
                id: active.id,
                reason: "unit has active reservations",
            });
        }

        let event = Event::UnitDeleted { id: unit_id };
        self.wal_append(&event).await?;
        unindex_unit(&guard, &self.entity_to_unit);
        self.state.remove(&unit_id);
        self.notify.send(unit_id, &event);
        self.notify.remove(&unit_id);
        metrics::gauge!(crate::observability::UNITS_ACTIVE).set(self.state.len() as f64);
        info!(%unit_id, "unit deleted");
        Ok(())
    }

    pub async fn update_availability(
        &self,
        actor: &Actor,
        unit_id: Ulid,
        policy: AvailabilityPolicy,
    ) -> Result<(), BookingError> {
        policy.validate().map_err(BookingError::InvalidPolicy)?;
        let mut guard = self.lock_unit(unit_id).await?;
        require_host(&guard, actor, "change availability")?;
        let event = Event::AvailabilityUpdated { unit_id, policy };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn update_pricing(
        &self,
        actor: &Actor,
        unit_id: Ulid,
        pricing: PricingPolicy,
    ) -> Result<(), BookingError> {
        pricing.validate().map_err(BookingError::InvalidPolicy)?;
        let mut guard = self.lock_unit(unit_id).await?;
        require_host(&guard, actor, "change pricing")?;
        let event = Event::PricingUpdated { unit_id, pricing };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn update_cancellation_policy(
        &self,
        actor: &Actor,
        unit_id: Ulid,
        policy: CancellationPolicy,
    ) -> Result<(), BookingError> {
        let mut guard = self.lock_unit(unit_id).await?;
        require_host(&guard, actor, "change the cancellation policy")?;
        let event = Event::CancellationPolicyUpdated { unit_id, policy };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Close `[start, end)` on the unit's calendar.
    pub async fn block_dates(
        &self,
        actor: &Actor,
        unit_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CalendarEntry, BookingError> {
        let span = block_span(start, end)?;
        let mut guard = self.lock_unit(unit_id).await?;
        require_host(&guard, actor, "block dates")?;
        if guard.calendar.len() >= MAX_CALENDAR_ENTRIES_PER_UNIT {
            return Err(BookingError::LimitExceeded("too many calendar entries on unit"));
        }
        ensure_calendar_free(&guard, &span, None)?;

        let entry = CalendarEntry {
            id: Ulid::new(),
            unit_id,
            reason: EntryReason::Blocked,
            span,
            created_at: self.now(),
        };
        let event = Event::DatesBlocked {
            entry: entry.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(entry)
    }

    pub async fn move_block(
        &self,
        actor: &Actor,
        entry_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<CalendarEntry, BookingError> {
        let span = block_span(start, end)?;
        let mut guard = self.resolve_entity_write(&entry_id).await?;
        require_host(&guard, actor, "move blocked dates")?;
        blocked_entry(&guard, entry_id)?;
        ensure_calendar_free(&guard, &span, Some(entry_id))?;

        let event = Event::BlockMoved {
            id: entry_id,
            unit_id: guard.id,
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .entry(entry_id)
            .cloned()
            .ok_or(BookingError::NotFound(entry_id))
    }

    pub async fn unblock_dates(&self, actor: &Actor, entry_id: Ulid) -> Result<(), BookingError> {
        let mut guard = self.resolve_entity_write(&entry_id).await?;
        require_host(&guard, actor, "unblock dates")?;
        blocked_entry(&guard, entry_id)?;
        let event = Event::DatesUnblocked {
            id: entry_id,
            unit_id: guard.id,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Rewrite the WAL as one snapshot event per unit.
    pub async fn compact_wal(&self) -> Result<(), BookingError> {
        // Exclusive catalog + every unit's read lock: nothing can commit
        // between the snapshot and the swap.
        let _catalog = self.catalog.write().await;
        let mut units: Vec<_> = self.state.iter().map(|e| (*e.key(), e.value().clone())).collect();
        units.sort_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(units.len());
        for (id, us) in units {
            let guard = tokio::time::timeout(self.config.lock_timeout, us.read_owned())
                .await
                .map_err(|_| self.lock_timed_out(id))?;
            guards.push(guard);
        }
        let events: Vec<Event> = guards
            .iter()
            .map(|g| Event::UnitRestored {
                state: Box::new((**g).clone()),
            })
            .collect();
        let unit_count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| BookingError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| BookingError::WalError(e.to_string()))?;

        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(units = unit_count, "WAL compacted");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> Result<u64, BookingError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| BookingError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::WalError("WAL writer dropped response".into()))
    }

    /// Compact if at least `threshold` events were appended since the last compaction.
    pub async fn compact_if_needed(&self, threshold: u64) -> Result<bool, BookingError> {
        if self.wal_appends_since_compact().await? < threshold {
            return Ok(false);
        }
        self.compact_wal().await?;
        Ok(true)
    }
}

