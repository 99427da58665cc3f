use std::collections::BTreeMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Half-open range of calendar dates `[start, end)`.
///
/// For a stay, `start` is the check-in date and `end` the check-out date, so
/// back-to-back stays (one checks out the day the next checks in) do not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateSpan start must be before end");
        Self { start, end }
    }

    /// Build a span only if `start < end`.
    pub fn checked(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_date(&self, d: NaiveDate) -> bool {
        self.start <= d && d < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &DateSpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Pad the span by `before` days on the left and `after` days on the right.
    /// Saturates at the representable date range.
    pub fn widen(&self, before: u32, after: u32) -> Self {
        let start = self
            .start
            .checked_sub_days(Days::new(before.into()))
            .unwrap_or(NaiveDate::MIN);
        let end = self
            .end
            .checked_add_days(Days::new(after.into()))
            .unwrap_or(NaiveDate::MAX);
        Self { start, end }
    }
}

impl fmt::Display for DateSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ── Unit policies ────────────────────────────────────────────────

pub const MIN_STAY_RANGE: RangeInclusive<u32> = 1..=7;
pub const MAX_STAY_RANGE: RangeInclusive<u32> = 8..=90;
pub const MIN_NOTICE_RANGE: RangeInclusive<u32> = 1..=30;
pub const MAX_NOTICE_RANGE: RangeInclusive<u32> = 31..=365;
pub const PREP_TIME_RANGE: RangeInclusive<u32> = 0..=5;

/// Host-defined stay and notice constraints. Stay bounds are in nights,
/// notice bounds and prep time in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityPolicy {
    pub min_stay: u32,
    pub max_stay: u32,
    pub min_notice: u32,
    pub max_notice: u32,
    /// Days the unit stays unavailable after each check-out.
    pub prep_time: u32,
    pub instant_booking: bool,
}

impl Default for AvailabilityPolicy {
    fn default() -> Self {
        Self {
            min_stay: 1,
            max_stay: 90,
            min_notice: 1,
            max_notice: 365,
            prep_time: 0,
            instant_booking: false,
        }
    }
}

impl AvailabilityPolicy {
    pub fn validate(&self) -> Result<(), &'static str> {
        if !MIN_STAY_RANGE.contains(&self.min_stay) {
            return Err("min_stay must be between 1 and 7 nights");
        }
        if !MAX_STAY_RANGE.contains(&self.max_stay) {
            return Err("max_stay must be between 8 and 90 nights");
        }
        if !MIN_NOTICE_RANGE.contains(&self.min_notice) {
            return Err("min_notice must be between 1 and 30 days");
        }
        if !MAX_NOTICE_RANGE.contains(&self.max_notice) {
            return Err("max_notice must be between 31 and 365 days");
        }
        if !PREP_TIME_RANGE.contains(&self.prep_time) {
            return Err("prep_time must be between 0 and 5 days");
        }
        // The ranges above are disjoint, so these hold whenever the fields are in range.
        debug_assert!(self.min_stay < self.max_stay);
        debug_assert!(self.min_notice < self.max_notice);
        Ok(())
    }
}

/// Highest nightly price a unit may charge.
pub const MAX_NIGHT_PRICE: Decimal = dec!(999999.99);

/// Nightly price and tax rate (a fraction, `0.15` = 15%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingPolicy {
    pub night_price: Decimal,
    pub tax_rate: Decimal,
}

impl PricingPolicy {
    pub fn new(night_price: Decimal, tax_rate: Decimal) -> Self {
        Self {
            night_price,
            tax_rate,
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.night_price < Decimal::ZERO {
            return Err("night_price must not be negative");
        }
        if self.night_price > MAX_NIGHT_PRICE {
            return Err("night_price must not exceed 999999.99");
        }
        if self.night_price != self.night_price.round_dp(2) {
            return Err("night_price has more than 2 decimal places");
        }
        if self.tax_rate < Decimal::ZERO || self.tax_rate > Decimal::ONE {
            return Err("tax_rate must be between 0 and 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CancellationPolicy {
    #[default]
    Flexible,
    Moderate,
    Firm,
    Strict,
    FirmLongTerm,
    StrictLongTerm,
    SuperStrict30,
    NonRefundable,
}

impl CancellationPolicy {
    pub const ALL: [CancellationPolicy; 8] = [
        CancellationPolicy::Flexible,
        CancellationPolicy::Moderate,
        CancellationPolicy::Firm,
        CancellationPolicy::Strict,
        CancellationPolicy::FirmLongTerm,
        CancellationPolicy::StrictLongTerm,
        CancellationPolicy::SuperStrict30,
        CancellationPolicy::NonRefundable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationPolicy::Flexible => "Flexible",
            CancellationPolicy::Moderate => "Moderate",
            CancellationPolicy::Firm => "Firm",
            CancellationPolicy::Strict => "Strict",
            CancellationPolicy::FirmLongTerm => "Firm Long Term",
            CancellationPolicy::StrictLongTerm => "Strict Long Term",
            CancellationPolicy::SuperStrict30 => "Super Strict 30",
            CancellationPolicy::NonRefundable => "Non-refundable",
        }
    }
}

impl fmt::Display for CancellationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPolicy(pub String);

impl fmt::Display for UnknownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown cancellation policy: {:?}", self.0)
    }
}

impl std::error::Error for UnknownPolicy {}

impl FromStr for CancellationPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CancellationPolicy::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPolicy(s.to_string()))
    }
}

/// Fraction of the reservation total returned on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefundRate {
    Nothing,
    Half,
    Full,
}

impl RefundRate {
    pub fn fraction(self) -> Decimal {
        match self {
            RefundRate::Nothing => Decimal::ZERO,
            RefundRate::Half => dec!(0.5),
            RefundRate::Full => Decimal::ONE,
        }
    }

    /// Refund owed on `total`, rounded to cents.
    pub fn amount(self, total: Decimal) -> Decimal {
        (total * self.fraction()).round_dp(2)
    }
}

// ── Callers ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Member,
    Admin,
}

/// The authenticated user performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn member(user_id: Ulid) -> Self {
        Self {
            user_id,
            role: Role::Member,
        }
    }

    pub fn admin(user_id: Ulid) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

// ── Calendar and booking records ─────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryReason {
    /// Occupied by a confirmed reservation. Lives and dies with it.
    Reservation { reservation_id: Ulid },
    /// Closed by the host.
    Blocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub reason: EntryReason,
    pub span: DateSpan,
    pub created_at: DateTime<Utc>,
}

impl CalendarEntry {
    pub fn is_blocked(&self) -> bool {
        matches!(self.reason, EntryReason::Blocked)
    }

    pub fn reservation_id(&self) -> Option<Ulid> {
        match self.reason {
            EntryReason::Reservation { reservation_id } => Some(reservation_id),
            EntryReason::Blocked => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Approved,
    Withdrawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Active,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeStatus {
    Pending,
    Applied,
    Withdrawn,
}

/// A guest's ask to stay at a unit; becomes a [`Reservation`] once approved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub user_id: Ulid,
    pub span: DateSpan,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

impl ReservationRequest {
    pub fn check_in(&self) -> NaiveDate {
        self.span.start
    }

    pub fn check_out(&self) -> NaiveDate {
        self.span.end
    }
}

/// Price breakdown frozen onto a reservation when it is confirmed or changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charges {
    pub nights: i64,
    pub night_price: Decimal,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub unit_id: Ulid,
    /// `None` for reservations created directly by an admin.
    pub request_id: Option<Ulid>,
    pub user_id: Ulid,
    pub span: DateSpan,
    pub calendar_entry_id: Ulid,
    pub charges: Charges,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
}

impl Reservation {
    pub fn check_in(&self) -> NaiveDate {
        self.span.start
    }

    pub fn check_out(&self) -> NaiveDate {
        self.span.end
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub reservation_id: Ulid,
    pub user_id: Ulid,
    /// Proposed new stay.
    pub span: DateSpan,
    /// Proposed nights minus the reservation's nights when the change was filed.
    pub nights_diff: i64,
    pub status: ChangeStatus,
    pub created_at: DateTime<Utc>,
}

/// Processed cancellation. Its existence means the reservation was voided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub id: Ulid,
    pub unit_id: Ulid,
    pub reservation_id: Ulid,
    pub user_id: Ulid,
    pub reason: String,
    pub policy: CancellationPolicy,
    pub days_before_check_in: i64,
    pub refund: RefundRate,
    pub refund_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

// ── Per-unit state ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitState {
    pub id: Ulid,
    pub host_id: Ulid,
    pub availability: AvailabilityPolicy,
    pub pricing: PricingPolicy,
    pub cancellation_policy: CancellationPolicy,
    /// Reservation and blocked entries, sorted by `span.start`.
    pub calendar: Vec<CalendarEntry>,
    pub requests: BTreeMap<Ulid, ReservationRequest>,
    pub reservations: BTreeMap<Ulid, Reservation>,
    pub changes: BTreeMap<Ulid, ChangeRequest>,
    pub cancellations: BTreeMap<Ulid, CancellationRequest>,
}

impl UnitState {
    pub fn new(
        id: Ulid,
        host_id: Ulid,
        availability: AvailabilityPolicy,
        pricing: PricingPolicy,
        cancellation_policy: CancellationPolicy,
    ) -> Self {
        Self {
            id,
            host_id,
            availability,
            pricing,
            cancellation_policy,
            calendar: Vec::new(),
            requests: BTreeMap::new(),
            reservations: BTreeMap::new(),
            changes: BTreeMap::new(),
            cancellations: BTreeMap::new(),
        }
    }

    /// Insert entry maintaining sort order by span.start.
    pub fn insert_entry(&mut self, entry: CalendarEntry) {
        let pos = self
            .calendar
            .binary_search_by_key(&entry.span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.calendar.insert(pos, entry);
    }

    pub fn remove_entry(&mut self, id: Ulid) -> Option<CalendarEntry> {
        let pos = self.calendar.iter().position(|e| e.id == id)?;
        Some(self.calendar.remove(pos))
    }

    pub fn entry(&self, id: Ulid) -> Option<&CalendarEntry> {
        self.calendar.iter().find(|e| e.id == id)
    }

    /// Return only entries whose span overlaps the query window.
    /// Uses binary search to skip entries starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &CalendarEntry> {
        let right_bound = self.calendar.partition_point(|e| e.span.start < query.end);
        self.calendar[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }

    pub fn active_reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values().filter(|r| r.is_active())
    }

    pub fn is_host(&self, actor: &Actor) -> bool {
        self.host_id == actor.user_id
    }

    pub fn info(&self) -> UnitInfo {
        UnitInfo {
            id: self.id,
            host_id: self.host_id,
            availability: self.availability,
            pricing: self.pricing,
            cancellation_policy: self.cancellation_policy,
        }
    }
}

/// The event types. This is the WAL record format: one event per committed
/// operation, so everything an operation writes lands atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UnitCreated {
        id: Ulid,
        host_id: Ulid,
        availability: AvailabilityPolicy,
        pricing: PricingPolicy,
        cancellation_policy: CancellationPolicy,
    },
    /// Full unit snapshot written by compaction.
    UnitRestored {
        state: Box<UnitState>,
    },
    UnitDeleted {
        id: Ulid,
    },
    AvailabilityUpdated {
        unit_id: Ulid,
        policy: AvailabilityPolicy,
    },
    PricingUpdated {
        unit_id: Ulid,
        pricing: PricingPolicy,
    },
    CancellationPolicyUpdated {
        unit_id: Ulid,
        policy: CancellationPolicy,
    },
    DatesBlocked {
        entry: CalendarEntry,
    },
    BlockMoved {
        id: Ulid,
        unit_id: Ulid,
        span: DateSpan,
    },
    DatesUnblocked {
        id: Ulid,
        unit_id: Ulid,
    },
    RequestSubmitted {
        request: ReservationRequest,
    },
    RequestRescheduled {
        id: Ulid,
        unit_id: Ulid,
        span: DateSpan,
    },
    RequestWithdrawn {
        id: Ulid,
        unit_id: Ulid,
    },
    /// Reservation and its calendar entry, written together. `request` carries
    /// the originating request in its approved form (absent for admin bookings).
    ReservationConfirmed {
        reservation: Reservation,
        entry: CalendarEntry,
        request: Option<ReservationRequest>,
    },
    ChangeRequested {
        change: ChangeRequest,
    },
    ChangeWithdrawn {
        id: Ulid,
        unit_id: Ulid,
    },
    ChangeApplied {
        id: Ulid,
        unit_id: Ulid,
        reservation_id: Ulid,
        span: DateSpan,
        charges: Charges,
    },
    ReservationCancelled {
        cancellation: CancellationRequest,
    },
}

impl Event {
    /// The unit this event belongs to.
    pub fn unit_id(&self) -> Ulid {
        match self {
            Event::UnitCreated { id, .. } | Event::UnitDeleted { id } => *id,
            Event::UnitRestored { state } => state.id,
            Event::AvailabilityUpdated { unit_id, .. }
            | Event::PricingUpdated { unit_id, .. }
            | Event::CancellationPolicyUpdated { unit_id, .. }
            | Event::BlockMoved { unit_id, .. }
            | Event::DatesUnblocked { unit_id, .. }
            | Event::RequestRescheduled { unit_id, .. }
            | Event::RequestWithdrawn { unit_id, .. }
            | Event::ChangeWithdrawn { unit_id, .. }
            | Event::ChangeApplied { unit_id, .. } => *unit_id,
            Event::DatesBlocked { entry } => entry.unit_id,
            Event::RequestSubmitted { request } => request.unit_id,
            Event::ReservationConfirmed { reservation, .. } => reservation.unit_id,
            Event::ChangeRequested { change } => change.unit_id,
            Event::ReservationCancelled { cancellation } => cancellation.unit_id,
        }
    }

    /// Short name used in logs and by the `inspect` command.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::UnitCreated { .. } => "unit_created",
            Event::UnitRestored { .. } => "unit_restored",
            Event::UnitDeleted { .. } => "unit_deleted",
            Event::AvailabilityUpdated { .. } => "availability_updated",
            Event::PricingUpdated { .. } => "pricing_updated",
            Event::CancellationPolicyUpdated { .. } => "cancellation_policy_updated",
            Event::DatesBlocked { .. } => "dates_blocked",
            Event::BlockMoved { .. } => "block_moved",
            Event::DatesUnblocked { .. } => "dates_unblocked",
            Event::RequestSubmitted { .. } => "request_submitted",
            Event::RequestRescheduled { .. } => "request_rescheduled",
            Event::RequestWithdrawn { .. } => "request_withdrawn",
            Event::ReservationConfirmed { .. } => "reservation_confirmed",
            Event::ChangeRequested { .. } => "change_requested",
            Event::ChangeWithdrawn { .. } => "change_withdrawn",
            Event::ChangeApplied { .. } => "change_applied",
            Event::ReservationCancelled { .. } => "reservation_cancelled",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitInfo {
    pub id: Ulid,
    pub host_id: Ulid,
    pub availability: AvailabilityPolicy,
    pub pricing: PricingPolicy,
    pub cancellation_policy: CancellationPolicy,
}

/// Result of submitting a reservation request. `reservation` is set when the
/// unit books instantly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub request: ReservationRequest,
    pub reservation: Option<Reservation>,
}

/// What cancelling a reservation right now would refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundQuote {
    pub reservation_id: Ulid,
    pub policy: CancellationPolicy,
    pub days_before_check_in: i64,
    pub within_grace: bool,
    pub rate: RefundRate,
    pub amount: Decimal,
}
