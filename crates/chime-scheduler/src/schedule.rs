use chime_core::clock::{floor_minute, SECONDS_PER_MINUTE};

use crate::error::{Result, SchedulerError};

const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;

/// Turn a trigger specification into an absolute, minute-aligned Unix timestamp.
///
/// Accepted forms:
/// - `+<N>m`, `+<N>h`, `+<N>d`: N minutes/hours/days after the current minute
/// - `<ts>`: absolute Unix seconds, a multiple of 60, strictly after the
///   current minute
///
/// Returns the absolute timestamp. Feeding the result back in yields the same
/// value as long as it is still in the future.
pub fn normalize_trigger_at(spec: &str, now: i64) -> Result<i64> {
    let invalid = || SchedulerError::InvalidTimeSpec(spec.to_string());

    if spec.len() < 3 {
        return Err(invalid());
    }

    let current_minute = floor_minute(now);

    if let Some(relative) = spec.strip_prefix('+') {
        if !relative.is_ascii() {
            return Err(invalid());
        }
        let (digits, unit) = relative.split_at(relative.len() - 1);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let step = match unit {
            "m" => SECONDS_PER_MINUTE,
            "h" => SECONDS_PER_HOUR,
            "d" => SECONDS_PER_DAY,
            _ => return Err(invalid()),
        };
        let amount: i64 = digits.parse().map_err(|_| invalid())?;
        return amount
            .checked_mul(step)
            .and_then(|offset| current_minute.checked_add(offset))
            .ok_or_else(invalid);
    }

    let ts: i64 = spec.parse().map_err(|_| invalid())?;
    if ts % SECONDS_PER_MINUTE != 0 || ts <= current_minute {
        return Err(invalid());
    }
    Ok(ts)
}
