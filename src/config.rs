use serde::Deserialize;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// SQLite database connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Optional Redis URL for the in-memory detail accelerator
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Steam Web API key (owned games lookups)
    #[serde(default)]
    pub steam_api_key: String,

    /// Steam Web API base URL
    #[serde(default = "default_steam_api_url")]
    pub steam_api_url: String,

    /// Steam store base URL (app details)
    #[serde(default = "default_steam_store_url")]
    pub steam_store_url: String,

    /// Steam OpenID endpoint
    #[serde(default = "default_steam_openid_url")]
    pub steam_openid_url: String,

    /// Public base URL of this service, used for OpenID return_to/realm
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Secret used to sign session cookies
    #[serde(default = "default_session_secret")]
    pub session_secret: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Loaded from the same environment in a second pass
    #[serde(skip)]
    pub pipeline: PipelineConfig,
}

/// Tunables for the detail cache and recommendation pipeline
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Maximum age of a cached detail before it is refreshed
    #[serde(default = "default_detail_ttl_secs")]
    pub detail_ttl_secs: i64,

    /// Number of top-played owned games considered for the profile
    #[serde(default = "default_profile_top_n")]
    pub profile_top_n: u32,

    /// Games with less playtime than this contribute nothing to the profile
    #[serde(default = "default_min_playtime_minutes")]
    pub min_playtime_minutes: i64,

    /// Maximum number of reasons attached to a scored candidate
    #[serde(default = "default_max_reasons")]
    pub max_reasons: usize,

    /// Per-call timeout for remote detail fetches
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Retries after the first failed upstream call
    #[serde(default = "default_fetch_max_retries")]
    pub fetch_max_retries: u32,

    /// Base backoff between retries, doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Serve an expired detail when the catalog is unreachable
    #[serde(default = "default_serve_stale_on_outage")]
    pub serve_stale_on_outage: bool,

    /// Delay between catalog calls when indexing (250ms = 240 req/min)
    #[serde(default = "default_index_delay_ms")]
    pub index_delay_ms: u64,

    /// Number of recommendations returned
    #[serde(default = "default_recommendation_limit")]
    pub recommendation_limit: usize,
}

fn default_database_url() -> String {
    "sqlite://steamrec.db?mode=rwc".to_string()
}

fn default_steam_api_url() -> String {
    "https://api.steampowered.com".to_string()
}

fn default_steam_store_url() -> String {
    "https://store.steampowered.com".to_string()
}

fn default_steam_openid_url() -> String {
    "https://steamcommunity.com/openid/login".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_session_secret() -> String {
    "dev-secret".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_detail_ttl_secs() -> i64 {
    604800 // 1 week in seconds
}

fn default_profile_top_n() -> u32 {
    50
}

fn default_min_playtime_minutes() -> i64 {
    30
}

fn default_max_reasons() -> usize {
    3
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_fetch_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_serve_stale_on_outage() -> bool {
    true
}

fn default_index_delay_ms() -> u64 {
    250
}

fn default_recommendation_limit() -> usize {
    20
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detail_ttl_secs: default_detail_ttl_secs(),
            profile_top_n: default_profile_top_n(),
            min_playtime_minutes: default_min_playtime_minutes(),
            max_reasons: default_max_reasons(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            fetch_max_retries: default_fetch_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            serve_stale_on_outage: default_serve_stale_on_outage(),
            index_delay_ms: default_index_delay_ms(),
            recommendation_limit: default_recommendation_limit(),
        }
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    /// Backoff after the `attempt`-th failure (0-based), doubling and saturating
    pub fn retry_backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff().saturating_mul(2u32.saturating_pow(attempt))
    }

    pub fn index_delay(&self) -> Duration {
        Duration::from_millis(self.index_delay_ms)
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = envy::from_env::<Config>()
            .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
        config.pipeline = envy::from_env::<PipelineConfig>()
            .map_err(|e| anyhow::anyhow!("Failed to load pipeline config: {}", e))?;
        Ok(config)
    }

    /// True when owned-games lookups are possible
    pub fn has_api_key(&self) -> bool {
        !self.steam_api_key.trim().is_empty()
    }
}
