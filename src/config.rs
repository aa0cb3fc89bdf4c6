use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

/// Main configuration for the productivity client
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct Config {
    /// Backend base URL, including the API prefix
    #[validate(url)]
    pub api_base_url: String,

    /// Directory holding credentials and persisted store slices
    pub state_dir: PathBuf,

    /// Log level (e.g., info, debug, trace)
    pub log_level: String,

    /// Lifetime of cached conversation-list responses; 0 disables the cache
    pub cache_ttl_secs: u64,

    /// Interval between job status polls
    #[validate(range(min = 100, max = 600000))]
    pub poll_interval_ms: u64,

    /// Page size used when listing conversations
    #[validate(range(min = 1, max = 500))]
    pub conversation_page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api/v1".to_string(),
            state_dir: default_state_dir(),
            log_level: "info".to_string(),
            cache_ttl_secs: 300,
            poll_interval_ms: 2000,
            conversation_page_size: 50,
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".productivity")
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid config: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

impl Config {
    /// Loads from `<state_dir>/config.toml` and `PRODUCTIVITY__*` variables.
    /// `PRODUCTIVITY__STATE_DIR` also picks the directory the file is read from.
    pub fn load() -> Result<Self, ConfigError> {
        let state_dir = std::env::var_os("PRODUCTIVITY__STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| Config::default().state_dir);
        Self::load_from(&state_dir)
    }

    pub fn load_from(state_dir: &Path) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let settings = config::Config::builder()
            .set_default("api_base_url", defaults.api_base_url.clone())?
            .set_default("state_dir", state_dir.to_string_lossy().to_string())?
            .set_default("log_level", defaults.log_level.clone())?
            .set_default("cache_ttl_secs", defaults.cache_ttl_secs as i64)?
            .set_default("poll_interval_ms", defaults.poll_interval_ms as i64)?
            .set_default("conversation_page_size", i64::from(defaults.conversation_page_size))?
            .add_source(
                config::File::with_name(&state_dir.join("config").to_string_lossy())
                    .required(false),
            )
            // Environment overrides: PRODUCTIVITY__API_BASE_URL, PRODUCTIVITY__LOG_LEVEL, etc.
            .add_source(config::Environment::with_prefix("PRODUCTIVITY").separator("__"))
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    /// `None` when caching is disabled.
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
