// src/config/duration.rs

use std::time::Duration;

/// Parse a config duration: an integer followed by `ms`, `s`, `m` or `h`
/// (`"250ms"`, `"30s"`, `"15m"`, `"2h"`). Whitespace between the number and
/// the unit is allowed.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' needs a unit (ms, s, m or h)"))?;
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(format!("duration '{s}' does not start with a number"));
    }

    let value: u64 = digits
        .parse()
        .map_err(|e| format!("duration '{s}': {e}"))?;
    let secs_per_unit = match unit.trim() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => return Err(format!("duration '{s}': unknown unit '{other}'")),
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is too large"))
}
