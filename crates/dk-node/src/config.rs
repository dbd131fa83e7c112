//! Node configuration, composed from each collaborator's own `from_env`
//! the way `api-server/src/rate_limit.rs::RateLimitConfig::from_env` and
//! `api-server/src/db.rs::DatabaseConfig::from_env` load theirs.

use std::path::PathBuf;

use dk_policy::db::DatabaseConfig;

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub user_id: String,
    pub keys_dir: PathBuf,
    pub relay_base_url: String,
    pub relay_ws_url: String,
    pub policy_listen_addr: String,
    pub database: DatabaseConfig,
    pub personality: Option<String>,
}

impl NodeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let user_id = std::env::var("DK_USER_ID").unwrap_or_else(|_| "node".to_string());

        let keys_dir = std::env::var("DK_KEYS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dk_crypto::Identity::keys_dir_default());

        let relay_base_url =
            std::env::var("DK_RELAY_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());

        let relay_ws_url =
            std::env::var("DK_RELAY_WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:8080/stream".to_string());

        let policy_listen_addr =
            std::env::var("DK_POLICY_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());

        let personality = std::env::var("DK_PERSONALITY").ok();

        Ok(Self {
            user_id,
            keys_dir,
            relay_base_url,
            relay_ws_url,
            policy_listen_addr,
            database: DatabaseConfig::from_env()?,
            personality,
        })
    }
}
