use std::time::Duration;

use chrono::{DateTime, Utc};

pub const FIVE_MINUTES: Duration = Duration::from_secs(5 * 60);

/// Source of "now" for a single request.
///
/// In test mode a caller-supplied instant replaces the wall clock, so expiry
/// can be exercised deterministically. Outside test mode the override is
/// ignored.
#[derive(Clone, Copy, Debug, Default)]
pub struct Clock {
    test_mode: bool,
}

impl Clock {
    pub const fn new(test_mode: bool) -> Self {
        Self { test_mode }
    }

    pub const fn is_test_mode(&self) -> bool {
        self.test_mode
    }

    pub fn now(&self, requested: Option<DateTime<Utc>>) -> DateTime<Utc> {
        match requested {
            Some(instant) if self.test_mode => instant,
            _ => Utc::now(),
        }
    }
}
