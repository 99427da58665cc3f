use std::fmt;

use ulid::Ulid;

use crate::model::DateSpan;

/// Why a proposed stay was rejected. Checks run in a fixed order and the
/// first failure is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingDates,
    CheckInNotInFuture,
    CheckOutNotAfterCheckIn,
    OverlapsReservation { reservation_id: Ulid, span: DateSpan },
    OverlapsBlocked { entry_id: Ulid, span: DateSpan },
    StayTooShort { nights: i64, min: u32 },
    StayTooLong { nights: i64, max: u32 },
    NoticeTooShort { days: i64, min: u32 },
    NoticeTooLong { days: i64, max: u32 },
}

impl ValidationError {
    /// Metric label for the failed check.
    pub fn rule(&self) -> &'static str {
        match self {
            ValidationError::MissingDates => "missing_dates",
            ValidationError::CheckInNotInFuture => "check_in_not_future",
            ValidationError::CheckOutNotAfterCheckIn => "check_out_not_after_check_in",
            ValidationError::OverlapsReservation { .. } => "overlaps_reservation",
            ValidationError::OverlapsBlocked { .. } => "overlaps_blocked",
            ValidationError::StayTooShort { .. } => "stay_too_short",
            ValidationError::StayTooLong { .. } => "stay_too_long",
            ValidationError::NoticeTooShort { .. } => "notice_too_short",
            ValidationError::NoticeTooLong { .. } => "notice_too_long",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingDates => write!(f, "check-in and check-out are required"),
            ValidationError::CheckInNotInFuture => write!(f, "check-in must be in the future"),
            ValidationError::CheckOutNotAfterCheckIn => {
                write!(f, "check-out must be after check-in")
            }
            ValidationError::OverlapsReservation {
                reservation_id,
                span,
            } => write!(f, "dates overlap reservation {reservation_id} {span}"),
            ValidationError::OverlapsBlocked { entry_id, span } => {
                write!(f, "dates overlap blocked period {entry_id} {span}")
            }
            ValidationError::StayTooShort { nights, min } => {
                write!(f, "stay of {nights} nights is shorter than the minimum of {min}")
            }
            ValidationError::StayTooLong { nights, max } => {
                write!(f, "stay of {nights} nights is longer than the maximum of {max}")
            }
            ValidationError::NoticeTooShort { days, min } => {
                write!(f, "check-in {days} days ahead is less than the {min} days notice required")
            }
            ValidationError::NoticeTooLong { days, max } => {
                write!(f, "check-in {days} days ahead is beyond the {max} day booking window")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    Validation(ValidationError),
    NotFound(Ulid),
    /// The record exists but is in the wrong state for the operation.
    Conflict {
        id: Ulid,
        reason: &'static str,
    },
    Forbidden {
        user_id: Ulid,
        action: &'static str,
    },
    InvalidPolicy(&'static str),
    /// Could not acquire the unit's lock in time. Safe to retry.
    LockTimeout(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl BookingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::LockTimeout(_))
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            BookingError::Validation(v) => Some(v),
            _ => None,
        }
    }
}

impl From<ValidationError> for BookingError {
    fn from(e: ValidationError) -> Self {
        BookingError::Validation(e)
    }
}

impl fmt::Display for BookingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BookingError::Validation(e) => write!(f, "invalid dates: {e}"),
            BookingError::NotFound(id) => write!(f, "not found: {id}"),
            BookingError::Conflict { id, reason } => write!(f, "conflict on {id}: {reason}"),
            BookingError::Forbidden { user_id, action } => {
                write!(f, "user {user_id} may not {action}")
            }
            BookingError::InvalidPolicy(msg) => write!(f, "invalid policy: {msg}"),
            BookingError::LockTimeout(unit_id) => {
                write!(f, "timed out waiting for unit {unit_id}; retry")
            }
            BookingError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            BookingError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::Validation(e) => Some(e),
            _ => None,
        }
    }
}
