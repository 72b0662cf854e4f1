use crate::events::Timestamp;
use chrono::Utc;

/// Source of the current time
///
/// Time-dependent components (rate limiting, cache expiry) take a clock so
/// tests can move time forward without sleeping.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}
