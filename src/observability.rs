use std::fmt;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;

// ── Booking metrics (request-driven) ────────────────────────────

/// Counter: reservation requests submitted. Labels: outcome (pending, instant, rejected).
pub const REQUESTS_TOTAL: &str = "staybook_requests_total";

/// Counter: reservations confirmed. Labels: source (instant, approval, admin).
pub const RESERVATIONS_CONFIRMED_TOTAL: &str = "staybook_reservations_confirmed_total";

/// Counter: validator rejections. Labels: rule.
pub const VALIDATION_FAILURES_TOTAL: &str = "staybook_validation_failures_total";

/// Counter: change requests applied.
pub const CHANGES_APPLIED_TOTAL: &str = "staybook_changes_applied_total";

/// Counter: cancellations processed. Labels: policy, refund.
pub const CANCELLATIONS_TOTAL: &str = "staybook_cancellations_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Counter: unit write-lock waits that hit the timeout.
pub const LOCK_TIMEOUTS_TOTAL: &str = "staybook_lock_timeouts_total";

/// Gauge: units loaded in the engine.
pub const UNITS_ACTIVE: &str = "staybook_units_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "staybook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "staybook_wal_flush_batch_size";

/// Counter: WAL compactions completed.
pub const WAL_COMPACTIONS_TOTAL: &str = "staybook_wal_compactions_total";

#[derive(Debug)]
pub enum TelemetryError {
    EnvFilter { value: String, source: ParseError },
    Subscriber(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::EnvFilter { value, .. } => {
                write!(f, "invalid log filter '{value}'")
            }
            TelemetryError::Subscriber(err) => write!(f, "telemetry error: {err}"),
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::EnvFilter { source, .. } => Some(source),
            TelemetryError::Subscriber(err) => Some(&**err),
        }
    }
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `fallback`.
pub fn init_tracing(fallback: &str) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(fallback).map_err(|source| TelemetryError::EnvFilter {
            value: fallback.to_string(),
            source,
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(TelemetryError::Subscriber)
}
