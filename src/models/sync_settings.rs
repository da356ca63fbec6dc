use serde::{Deserialize, Serialize};

/// Remote folder all shards live under
pub const DEFAULT_REMOTE_PATH: &str = "life-habits-data";
/// Parallel shard transfers
pub const DEFAULT_CONCURRENCY: usize = 3;
/// Quiet period after a local change before auto sync runs
pub const DEFAULT_DEBOUNCE_MS: u64 = 3000;

fn default_remote_path() -> String {
    DEFAULT_REMOTE_PATH.to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

fn default_database_path() -> String {
    "./data/lifehabits.db".to_string()
}

/// Synchronization settings for the WebDAV remote
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncSettings {
    #[serde(default, skip_serializing)]
    pub id: i64,
    /// WebDAV base URL, e.g. `https://cloud.example.com/remote.php/dav/files/alice`
    pub server_url: String,
    pub username: String,
    pub app_password: String,
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Periodic sync in addition to change-triggered syncs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    /// Local SQLite file (CLI only, not stored in the database)
    #[serde(default = "default_database_path", skip_serializing)]
    pub database_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub last_sync: Option<String>,
    #[serde(default, skip_serializing)]
    pub created_at: String,
    #[serde(default, skip_serializing)]
    pub updated_at: String,
}

impl SyncSettings {
    pub fn new(
        server_url: String,
        username: String,
        app_password: String,
        remote_path: String,
    ) -> Self {
        Self {
            id: 0,
            server_url,
            username,
            app_password,
            remote_path,
            enabled: true,
            concurrency: DEFAULT_CONCURRENCY,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            poll_interval_secs: None,
            database_path: default_database_path(),
            device_id: None,
            last_sync: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    /// Remote root without surrounding slashes
    pub fn root(&self) -> &str {
        let root = self.remote_path.trim_matches('/');
        if root.is_empty() {
            DEFAULT_REMOTE_PATH
        } else {
            root
        }
    }

    /// Checks that a WebDAV client can be built from these settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server_url.trim().is_empty() {
            return Err("server_url is empty".to_string());
        }
        if self.username.trim().is_empty() || self.app_password.is_empty() {
            return Err("credentials are incomplete".to_string());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn webdav_config(&self) -> webdav_store::WebDavConfig {
        webdav_store::WebDavConfig {
            base_url: self.server_url.trim().to_string(),
            username: self.username.clone(),
            password: self.app_password.clone(),
        }
    }

    /// Converts to TOML string
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Loads from TOML string
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}
