use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since epoch, for wire-frame `timestamp` fields (§6.1).
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
