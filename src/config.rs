use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::limits::MAX_UNITS;

pub const DEFAULT_WAL_PATH: &str = "./data/staybook.wal";
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1_000;
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Which side(s) of an existing stay the unit's prep time guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrepBuffer {
    /// Prep days follow each existing check-out only. A new stay may end
    /// right where an existing one begins.
    #[default]
    Trailing,
    /// Prep days are kept free on both sides of every stay.
    Symmetric,
}

impl PrepBuffer {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trailing" | "after" => Some(Self::Trailing),
            "symmetric" | "both" => Some(Self::Symmetric),
            _ => None,
        }
    }

    /// Days of padding `(before, after)` applied to an existing stay.
    pub fn padding(self, prep_time: u32) -> (u32, u32) {
        match self {
            PrepBuffer::Trailing => (0, prep_time),
            PrepBuffer::Symmetric => (prep_time, prep_time),
        }
    }
}

/// Engine settings. `EngineConfig::new` gives defaults for everything but the
/// WAL path; `from_env` reads the `STAYBOOK_*` variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub wal_path: PathBuf,
    /// Upper bound on waiting for a unit's write lock.
    pub lock_timeout: Duration,
    pub prep_buffer: PrepBuffer,
    /// Appends after which the background compactor rewrites the WAL.
    pub compact_threshold: u64,
    /// Cap on live units; `create_unit` refuses once it is reached.
    pub max_units: usize,
    pub log_filter: String,
}

impl EngineConfig {
    pub fn new(wal_path: impl Into<PathBuf>) -> Self {
        Self {
            wal_path: wal_path.into(),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            prep_buffer: PrepBuffer::default(),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            max_units: MAX_UNITS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }

    pub fn with_prep_buffer(mut self, prep_buffer: PrepBuffer) -> Self {
        self.prep_buffer = prep_buffer;
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_max_units(mut self, max_units: usize) -> Self {
        self.max_units = max_units;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Missing keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let wal_path = lookup("STAYBOOK_WAL_PATH").unwrap_or_else(|| DEFAULT_WAL_PATH.to_string());
        let mut config = Self::new(wal_path);

        if let Some(raw) = lookup("STAYBOOK_LOCK_TIMEOUT_MS") {
            let ms = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or(ConfigError::InvalidLockTimeout(raw.clone()))?;
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("STAYBOOK_PREP_BUFFER") {
            config.prep_buffer =
                PrepBuffer::parse(&raw).ok_or(ConfigError::InvalidPrepBuffer(raw.clone()))?;
        }
        if let Some(raw) = lookup("STAYBOOK_COMPACT_THRESHOLD") {
            config.compact_threshold = raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidCompactThreshold(raw.clone()))?;
        }
        if let Some(filter) = lookup("STAYBOOK_LOG") {
            config.log_filter = filter;
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidLockTimeout(String),
    InvalidPrepBuffer(String),
    InvalidCompactThreshold(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidLockTimeout(v) => {
                write!(f, "STAYBOOK_LOCK_TIMEOUT_MS must be a positive integer, got {v:?}")
            }
            ConfigError::InvalidPrepBuffer(v) => {
                write!(f, "STAYBOOK_PREP_BUFFER must be 'trailing' or 'symmetric', got {v:?}")
            }
            ConfigError::InvalidCompactThreshold(v) => {
                write!(f, "STAYBOOK_COMPACT_THRESHOLD must be an integer, got {v:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
