use std::time::SystemTime;

/// RFC 3339 timestamp for live-log entries and similar wire records.
pub fn now_rfc3339() -> String {
    humantime::format_rfc3339(SystemTime::now()).to_string()
}

/// Seconds elapsed between an RFC 3339 timestamp and now. `None` if `ts`
/// doesn't parse or lies in the future.
pub fn seconds_since_rfc3339(ts: &str) -> Option<f64> {
    let then = humantime::parse_rfc3339(ts).ok()?;
    SystemTime::now().duration_since(then).ok().map(|d| d.as_secs_f64())
}
