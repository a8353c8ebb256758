//! Clock implementations.

use chrono::{DateTime, Utc};

use crate::ports::ClockPort;

/// System clock - uses real time.
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockPort for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed clock for testing.
#[cfg(any(test, feature = "testing"))]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(any(test, feature = "testing"))]
impl ClockPort for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
