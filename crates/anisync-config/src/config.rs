use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub account: Option<AccountConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tuning knobs for the sync engine.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SyncSettings {
    /// Delay after the last mutation before the batched remote write fires
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_watchlist_retry_attempts")]
    pub watchlist_retry_attempts: u32,

    #[serde(default = "default_watchlist_retry_backoff_ms")]
    pub watchlist_retry_backoff_ms: u64,

    /// How long a fetched remote document is reused before reading again
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Above this estimated size a warning is logged, nothing is dropped
    #[serde(default = "default_soft_ceiling_bytes")]
    pub soft_ceiling_bytes: usize,

    /// Remote documents are never written above this size
    #[serde(default = "default_hard_ceiling_bytes")]
    pub hard_ceiling_bytes: usize,

    /// Progress updates smaller than this are throttled...
    #[serde(default = "default_progress_threshold_secs")]
    pub progress_threshold_secs: f64,

    /// ...unless this long has passed since the last applied update
    #[serde(default = "default_progress_idle_secs")]
    pub progress_idle_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    /// One JSON document per account in a local directory
    #[default]
    Directory,
    /// REST document service
    Http,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RemoteConfig {
    #[serde(default)]
    pub kind: RemoteKind,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: Option<bool>,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_watchlist_retry_attempts() -> u32 {
    3
}

fn default_watchlist_retry_backoff_ms() -> u64 {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_soft_ceiling_bytes() -> usize {
    800_000
}

fn default_hard_ceiling_bytes() -> usize {
    1_000_000 // remote document limit is 1MB
}

fn default_progress_threshold_secs() -> f64 {
    5.0
}

fn default_progress_idle_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            watchlist_retry_attempts: default_watchlist_retry_attempts(),
            watchlist_retry_backoff_ms: default_watchlist_retry_backoff_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
            soft_ceiling_bytes: default_soft_ceiling_bytes(),
            hard_ceiling_bytes: default_hard_ceiling_bytes(),
            progress_threshold_secs: default_progress_threshold_secs(),
            progress_idle_secs: default_progress_idle_secs(),
        }
    }
}

impl SyncSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn watchlist_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.watchlist_retry_backoff_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn progress_idle(&self) -> Duration {
        Duration::from_secs(self.progress_idle_secs)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.soft_ceiling_bytes >= self.hard_ceiling_bytes {
            return Err(anyhow::anyhow!(
                "soft_ceiling_bytes ({}) must be below hard_ceiling_bytes ({})",
                self.soft_ceiling_bytes,
                self.hard_ceiling_bytes
            ));
        }
        if self.watchlist_retry_attempts == 0 {
            return Err(anyhow::anyhow!("watchlist_retry_attempts must be at least 1"));
        }
        if self.progress_threshold_secs < 0.0 {
            return Err(anyhow::anyhow!("progress_threshold_secs must be non-negative"));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: None,
            file: None,
        }
    }
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the config file if present, otherwise fall back to defaults.
    pub fn load_or_default(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to_file(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.sync.validate()?;

        if self.remote.kind == RemoteKind::Http {
            let base_url = self.remote.base_url.as_deref().unwrap_or_default();
            if base_url.is_empty() {
                return Err(anyhow::anyhow!("remote.base_url is required when remote.kind = \"http\""));
            }
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(anyhow::anyhow!("remote.base_url must be an http(s) URL: {}", base_url));
            }
        }

        if let Some(ref account) = self.account {
            if account.id.trim().is_empty() {
                return Err(anyhow::anyhow!("account.id cannot be empty"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_load_and_save() {
        let file = NamedTempFile::new().unwrap();
        let config = Config {
            sync: SyncSettings {
                debounce_ms: 500,
                ..SyncSettings::default()
            },
            remote: RemoteConfig {
                kind: RemoteKind::Http,
                base_url: Some("https://sync.example".to_string()),
                api_token: Some("token".to_string()),
                directory: None,
                request_timeout_secs: 10,
            },
            account: Some(AccountConfig {
                id: "user-1".to_string(),
                verified: true,
            }),
            logging: LoggingConfig::default(),
        };

        let path = file.path().to_path_buf();
        config.save_to_file(&path).unwrap();

        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.sync.debounce_ms, 500);
        assert_eq!(loaded.sync.hard_ceiling_bytes, 1_000_000);
        assert_eq!(loaded.remote.kind, RemoteKind::Http);
        assert_eq!(loaded.account.as_ref().unwrap().id, "user-1");
        assert!(loaded.account.as_ref().unwrap().verified);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str("[sync]\ndebounce_ms = 100\n").unwrap();
        assert_eq!(config.sync.debounce_ms, 100);
        assert_eq!(config.sync.watchlist_retry_attempts, 3);
        assert_eq!(config.sync.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.remote.kind, RemoteKind::Directory);
        assert!(config.account.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_ceilings() {
        let mut config = Config::default();
        config.sync.soft_ceiling_bytes = 2_000_000;
        assert!(config.validate().is_err());

        config.sync.soft_ceiling_bytes = 500_000;
        config.sync.watchlist_retry_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_http_requires_base_url() {
        let mut config = Config::default();
        config.remote.kind = RemoteKind::Http;
        assert!(config.validate().is_err());

        config.remote.base_url = Some("ftp://nope".to_string());
        assert!(config.validate().is_err());

        config.remote.base_url = Some("https://sync.example".to_string());
        assert!(config.validate().is_ok());
    }
}
