/// Protocol version advertised in server startup logs and `/health`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Challenge lifetime (§4.4): 10 minutes.
pub const CHALLENGE_TTL_MS: u64 = 10 * 60 * 1_000;

/// Auth deadline after WebSocket accept (§4.6, §6.5 `AUTH_TIMEOUT_MS`).
pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 30_000;

/// Rate limiter defaults (§4.5, §6.5).
pub const DEFAULT_MAX_AUTH_ATTEMPTS: u32 = 5;
pub const DEFAULT_AUTH_WINDOW_MS: u64 = 600_000;
pub const MAX_BACKOFF_SECS: u64 = 1_800;
pub const RATE_LIMIT_GC_INTERVAL_MS: u64 = 3_600_000;
pub const RATE_LIMIT_IDLE_RECLAIM_MS: u64 = 24 * 60 * 60 * 1_000;

/// Client runtime defaults (§4.9).
pub const DEFAULT_AUTH_CHALLENGE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
pub const MAX_RECONNECT_DELAY_MS: u64 = 30_000;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const RECONNECT_JITTER: f64 = 0.2;

/// Default signature digest (§3, §6.5).
pub const DEFAULT_SIGNATURE_ALGORITHM: &str = "SHA256";

/// Backup rotation default keep-N (§4.3).
pub const DEFAULT_BACKUP_KEEP: usize = 10;
