//! Wall-clock helpers. Everything in chime runs on whole Unix seconds and
//! schedules on whole minutes.

use chrono::Utc;

pub const SECONDS_PER_MINUTE: i64 = 60;

/// Current Unix time in seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Floor a Unix timestamp to the start of its minute.
pub fn floor_minute(ts: i64) -> i64 {
    ts - ts.rem_euclid(SECONDS_PER_MINUTE)
}

/// Start of the current minute as a Unix timestamp.
pub fn current_minute() -> i64 {
    floor_minute(unix_now())
}
