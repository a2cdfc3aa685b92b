//! Process clock helpers.

use chrono::Utc;

/// Current unix time in milliseconds.
pub(crate) fn unix_ms() -> i64 {
    Utc::now().timestamp_millis()
}
