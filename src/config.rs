use lazy_static::lazy_static;

/// Process-wide, compile-time-ish configuration read once from the
/// environment at startup: small, env-derived, constructed once and read
/// everywhere rather than threaded through every call site.
pub struct Config {
    pub db_path: String,
    pub default_server_port: u16,
    pub default_s2s_port: u16,
    pub rate_limit_count: u32,
    pub rate_limit_window_sec: u64,
    pub session_ttl_sec: i64,
    pub cron_tick_sec: u64,
}

lazy_static! {
    pub static ref CONFIG: Config = {
        let db_path = std::env::var("SECTORD_DB_PATH").unwrap_or_else(|_| "sectord.db".to_string());
        let default_server_port = std::env::var("SECTORD_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1234);
        let default_s2s_port = std::env::var("SECTORD_S2S_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4321);
        let rate_limit_count = std::env::var("SECTORD_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);
        let rate_limit_window_sec = std::env::var("SECTORD_RATE_WINDOW_SEC")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        let session_ttl_sec = std::env::var("SECTORD_SESSION_TTL_SEC")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86400);
        let cron_tick_sec = std::env::var("SECTORD_CRON_TICK_SEC")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(10);
        Config {
            db_path,
            default_server_port,
            default_s2s_port,
            rate_limit_count,
            rate_limit_window_sec,
            session_ttl_sec,
            cron_tick_sec,
        }
    };
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("db_path", &self.db_path)
            .field("default_server_port", &self.default_server_port)
            .field("default_s2s_port", &self.default_s2s_port)
            .field("rate_limit_count", &self.rate_limit_count)
            .field("rate_limit_window_sec", &self.rate_limit_window_sec)
            .finish()
    }
}
