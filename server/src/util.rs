use chrono::Utc;

/// Wall-clock milliseconds since the unix epoch, used for every persisted timestamp.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Elapsed milliseconds between two timestamps, clamped at zero for clock skew.
pub fn elapsed_ms(since: i64, now: i64) -> u64 {
    now.saturating_sub(since).max(0) as u64
}
