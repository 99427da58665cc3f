mod availability;
mod cancellations;
mod changes;
mod error;
mod mutations;
mod pricing;
mod queries;
mod refund;
mod reservations;
mod validate;

pub use availability::{free_ranges, merge_overlapping, subtract_intervals};
pub use error::{BookingError, ValidationError};
pub use pricing::compute_charges;
pub use refund::{GRACE_PERIOD_DAYS, LONG_TERM_MIN_NIGHTS, RefundContext, compute_refund};
pub use validate::{collides, validate_window};

use std::io;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedUnitState = Arc<RwLock<UnitState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        warn!(error = %e, events = batch.len(), "WAL batch failed");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    let result = match append_err {
        Some(e) => Err(e),
        None => wal.flush_sync(),
    };
    // Every caller hears about a failure, so none of the batch may survive on disk.
    if result.is_err()
        && let Err(e) = wal.rollback()
    {
        warn!(error = %e, "WAL rollback after failed batch also failed");
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedUnitState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: EngineConfig,
    /// Reverse lookup: entity id (calendar entry, request, reservation,
    /// change, cancellation) → unit id.
    pub(super) entity_to_unit: DashMap<Ulid, Ulid>,
    /// Held shared by unit deletion, exclusively by creation and compaction.
    /// A snapshot never misses a unit whose event is still in flight, and the
    /// unit cap is checked and consumed in one step.
    pub(super) catalog: RwLock<()>,
}

/// Register every entity of a unit in the reverse index.
fn index_unit(us: &UnitState, entity_map: &DashMap<Ulid, Ulid>) {
    let ids = us
        .calendar
        .iter()
        .map(|e| e.id)
        .chain(us.requests.keys().copied())
        .chain(us.reservations.keys().copied())
        .chain(us.changes.keys().copied())
        .chain(us.cancellations.keys().copied());
    for id in ids {
        entity_map.insert(id, us.id);
    }
}

fn unindex_unit(us: &UnitState, entity_map: &DashMap<Ulid, Ulid>) {
    entity_map.retain(|_, unit_id| *unit_id != us.id);
}

/// Apply an event directly to a UnitState (no locking; caller holds the lock).
fn apply_to_unit(us: &mut UnitState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::AvailabilityUpdated { policy, .. } => us.availability = *policy,
        Event::PricingUpdated { pricing, .. } => us.pricing = *pricing,
        Event::CancellationPolicyUpdated { policy, .. } => us.cancellation_policy = *policy,
        Event::DatesBlocked { entry } => {
            us.insert_entry(entry.clone());
            entity_map.insert(entry.id, us.id);
        }
        Event::BlockMoved { id, span, .. } => {
            if let Some(mut entry) = us.remove_entry(*id) {
                entry.span = *span;
                us.insert_entry(entry);
            }
        }
        Event::DatesUnblocked { id, .. } => {
            us.remove_entry(*id);
            entity_map.remove(id);
        }
        Event::RequestSubmitted { request } => {
            us.requests.insert(request.id, request.clone());
            entity_map.insert(request.id, us.id);
        }
        Event::RequestRescheduled { id, span, .. } => {
            if let Some(request) = us.requests.get_mut(id) {
                request.span = *span;
            }
        }
        Event::RequestWithdrawn { id, .. } => {
            if let Some(request) = us.requests.get_mut(id) {
                request.status = RequestStatus::Withdrawn;
            }
        }
        Event::ReservationConfirmed {
            reservation,
            entry,
            request,
        } => {
            if let Some(request) = request {
                us.requests.insert(request.id, request.clone());
                entity_map.insert(request.id, us.id);
            }
            us.reservations.insert(reservation.id, reservation.clone());
            us.insert_entry(entry.clone());
            entity_map.insert(reservation.id, us.id);
            entity_map.insert(entry.id, us.id);
        }
        Event::ChangeRequested { change } => {
            us.changes.insert(change.id, change.clone());
            entity_map.insert(change.id, us.id);
        }
        Event::ChangeWithdrawn { id, .. } => {
            if let Some(change) = us.changes.get_mut(id) {
                change.status = ChangeStatus::Withdrawn;
            }
        }
        Event::ChangeApplied {
            id,
            reservation_id,
            span,
            charges,
            ..
        } => {
            if let Some(change) = us.changes.get_mut(id) {
                change.status = ChangeStatus::Applied;
            }
            if let Some(reservation) = us.reservations.get_mut(reservation_id) {
                reservation.span = *span;
                reservation.charges = *charges;
                let entry_id = reservation.calendar_entry_id;
                if let Some(mut entry) = us.remove_entry(entry_id) {
                    entry.span = *span;
                    us.insert_entry(entry);
                }
            }
        }
        Event::ReservationCancelled { cancellation } => {
            if let Some(reservation) = us.reservations.get_mut(&cancellation.reservation_id) {
                reservation.status = ReservationStatus::Cancelled;
                let entry_id = reservation.calendar_entry_id;
                us.remove_entry(entry_id);
                entity_map.remove(&entry_id);
            }
            us.cancellations.insert(cancellation.id, cancellation.clone());
            entity_map.insert(cancellation.id, us.id);
        }
        // Unit lifecycle events are handled at the DashMap level, not here.
        Event::UnitCreated { .. } | Event::UnitRestored { .. } | Event::UnitDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(config: EngineConfig, clock: Arc<dyn Clock>, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::open_and_replay(&config.wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            clock,
            config,
            entity_to_unit: DashMap::new(),
            catalog: RwLock::new(()),
        };

        // We're the sole owner of these Arcs, so try_write always succeeds.
        // Never use blocking_write here: this runs inside an async context.
        for event in &events {
            match event {
                Event::UnitCreated {
                    id,
                    host_id,
                    availability,
                    pricing,
                    cancellation_policy,
                } => {
                    let us = UnitState::new(*id, *host_id, *availability, *pricing, *cancellation_policy);
                    engine.state.insert(*id, Arc::new(RwLock::new(us)));
                }
                Event::UnitRestored { state } => {
                    index_unit(state, &engine.entity_to_unit);
                    engine
                        .state
                        .insert(state.id, Arc::new(RwLock::new(state.as_ref().clone())));
                }
                Event::UnitDeleted { id } => {
                    if let Some((_, us)) = engine.state.remove(id)
                        && let Ok(guard) = us.try_read()
                    {
                        unindex_unit(&guard, &engine.entity_to_unit);
                    }
                }
                other => {
                    let unit_id = other.unit_id();
                    if let Some(entry) = engine.state.get(&unit_id) {
                        let us = entry.clone();
                        if let Ok(mut guard) = us.try_write() {
                            apply_to_unit(&mut guard, other, &engine.entity_to_unit);
                        }
                    }
                }
            }
        }

        metrics::gauge!(crate::observability::UNITS_ACTIVE).set(engine.state.len() as f64);
        debug!(
            events = events.len(),
            units = engine.state.len(),
            "replayed WAL"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(super) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(super) fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), BookingError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| BookingError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| BookingError::WalError(e.to_string()))
    }

    pub fn get_unit(&self, id: &Ulid) -> Option<SharedUnitState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_unit_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_unit.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        us: &mut UnitState,
        event: &Event,
    ) -> Result<(), BookingError> {
        self.wal_append(event).await?;
        apply_to_unit(us, event, &self.entity_to_unit);
        self.notify.send(us.id, event);
        Ok(())
    }

    /// Acquire a unit's write lock, waiting at most `lock_timeout`.
    pub(super) async fn lock_unit(
        &self,
        unit_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<UnitState>, BookingError> {
        let us = self.get_unit(&unit_id).ok_or(BookingError::NotFound(unit_id))?;
        let guard = tokio::time::timeout(self.config.lock_timeout, us.write_owned())
            .await
            .map_err(|_| self.lock_timed_out(unit_id))?;
        // The unit may have been deleted while we waited.
        if !self.state.contains_key(&unit_id) {
            return Err(BookingError::NotFound(unit_id));
        }
        Ok(guard)
    }

    /// Acquire a unit's read lock, waiting at most `lock_timeout`.
    pub(super) async fn read_unit(
        &self,
        unit_id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<UnitState>, BookingError> {
        let us = self.get_unit(&unit_id).ok_or(BookingError::NotFound(unit_id))?;
        tokio::time::timeout(self.config.lock_timeout, us.read_owned())
            .await
            .map_err(|_| self.lock_timed_out(unit_id))
    }

    fn lock_timed_out(&self, unit_id: Ulid) -> BookingError {
        metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
        warn!(%unit_id, timeout = ?self.config.lock_timeout, "unit lock wait timed out");
        BookingError::LockTimeout(unit_id)
    }

    /// Lookup entity → unit, acquire the unit's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<UnitState>, BookingError> {
        let unit_id = self
            .get_unit_for_entity(entity_id)
            .ok_or(BookingError::NotFound(*entity_id))?;
        self.lock_unit(unit_id).await
    }

    /// Lookup entity → unit, acquire the unit's read lock.
    pub(super) async fn resolve_entity_read(
        &self,
        entity_id: &Ulid,
    ) -> Result<OwnedRwLockReadGuard<UnitState>, BookingError> {
        let unit_id = self
            .get_unit_for_entity(entity_id)
            .ok_or(BookingError::NotFound(*entity_id))?;
        self.read_unit(unit_id).await
    }

    /// Run the window validator against a locked unit, recording rejections.
    pub(super) fn validate_stay(
        &self,
        us: &UnitState,
        check_in: Option<NaiveDate>,
        check_out: Option<NaiveDate>,
        exclude: Option<Ulid>,
    ) -> Result<DateSpan, BookingError> {
        validate_window(us, check_in, check_out, exclude, self.today(), self.config.prep_buffer)
            .map_err(|e| {
                metrics::counter!(
                    crate::observability::VALIDATION_FAILURES_TOTAL,
                    "rule" => e.rule()
                )
                .increment(1);
                debug!(unit_id = %us.id, rule = e.rule(), "stay rejected: {e}");
                BookingError::Validation(e)
            })
    }

    /// Subscribe to committed events of a unit.
    pub fn subscribe(&self, unit_id: Ulid) -> tokio::sync::broadcast::Receiver<Event> {
        self.notify.subscribe(unit_id)
    }
}

/// Host-side operations: the unit's host or an admin.
pub(super) fn require_host(
    us: &UnitState,
    actor: &Actor,
    action: &'static str,
) -> Result<(), BookingError> {
    if actor.is_admin() || us.is_host(actor) {
        Ok(())
    } else {
        Err(BookingError::Forbidden {
            user_id: actor.user_id,
            action,
        })
    }
}

/// Guest-side operations on a record: its owner or an admin.
pub(super) fn require_owner(
    owner: Ulid,
    actor: &Actor,
    action: &'static str,
) -> Result<(), BookingError> {
    if actor.is_admin() || actor.user_id == owner {
        Ok(())
    } else {
        Err(BookingError::Forbidden {
            user_id: actor.user_id,
            action,
        })
    }
}
