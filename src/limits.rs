/// Max rental units held by one engine.
pub const MAX_UNITS: usize = 100_000;

/// Max calendar entries (reservations + blocks) on a single unit.
pub const MAX_CALENDAR_ENTRIES_PER_UNIT: usize = 10_000;

/// Max pending reservation requests on a single unit.
pub const MAX_PENDING_REQUESTS_PER_UNIT: usize = 1_000;

/// Max length of a cancellation reason, in bytes.
pub const MAX_REASON_LEN: usize = 2_000;

/// Max width of an availability query, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 730;

/// Max length of a host block, in days.
pub const MAX_BLOCK_DAYS: i64 = 366;
