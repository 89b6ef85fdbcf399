use crate::auth::DEFAULT_TOKEN_TTL_MINS;
use std::path::PathBuf;

/// Registry configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// SQLite database file (default: `<data dir>/registry.db`).
    pub db_path: PathBuf,
    /// Bearer token lifetime in minutes.
    pub token_ttl_mins: i64,
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| rollcall_core::default_data_dir().join("registry.db"));

        let token_ttl_mins = std::env::var("ROLLCALL_TOKEN_TTL_MINS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|mins: &i64| *mins > 0)
            .unwrap_or(DEFAULT_TOKEN_TTL_MINS);

        Self {
            db_path,
            token_ttl_mins,
        }
    }
}
