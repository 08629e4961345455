// Requested data window
use serde::{Deserialize, Serialize};

const MS_PER_HOUR: i64 = 60 * 60 * 1000;

/// A `[start_ms, end_ms)` window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeRange {
    pub fn new(start_ms: i64, end_ms: i64) -> Self {
        Self { start_ms, end_ms }
    }

    /// Window of `hours` ending at `now_ms`. `None` for negative hours or a
    /// start that does not fit in `i64` milliseconds.
    pub fn last_hours(now_ms: i64, hours: i64) -> Option<Self> {
        if hours < 0 {
            return None;
        }
        let span = hours.checked_mul(MS_PER_HOUR)?;
        let start_ms = now_ms.checked_sub(span)?;
        Some(Self::new(start_ms, now_ms))
    }

    pub fn contains(&self, time_ms: i64) -> bool {
        self.start_ms <= time_ms && time_ms < self.end_ms
    }

    /// True when the window reaches past `now_ms`, so samples may still arrive.
    pub fn window_may_have_new_data(&self, now_ms: i64) -> bool {
        self.end_ms > now_ms
    }
}
