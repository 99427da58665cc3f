//! Booking engine for short-term rental units: date-window validation,
//! reservation request / change / cancellation lifecycles, and refund
//! computation, persisted through a group-committed write-ahead log.

pub mod clock;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod wal;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{EngineConfig, PrepBuffer};
pub use engine::{BookingError, Engine, ValidationError};
