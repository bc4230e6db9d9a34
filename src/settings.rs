use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::chains::ChainConfig;

/// Batched GraphQL endpoints reject more than 50 aliased fields per document.
pub const MAX_CHUNK_SIZE: usize = 49;

#[derive(Debug, Deserialize, Clone)]
pub struct FetchSettings {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Attempts per chunk on the primary path (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    #[serde(default = "default_fallback_concurrency")]
    pub fallback_concurrency: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional client-side rate limit for LCD requests.
    #[serde(default)]
    pub lcd_qps_limit: Option<u32>,
}

fn default_chunk_size() -> usize {
    MAX_CHUNK_SIZE
}
fn default_max_attempts() -> usize {
    2
}
fn default_batch_concurrency() -> usize {
    3
}
fn default_fallback_concurrency() -> usize {
    4
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_attempts: default_max_attempts(),
            batch_concurrency: default_batch_concurrency(),
            fallback_concurrency: default_fallback_concurrency(),
            request_timeout_ms: default_request_timeout_ms(),
            lcd_qps_limit: None,
        }
    }
}

impl FetchSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    Memory,
    File,
    Redis,
    None,
}

impl Default for CacheBackend {
    fn default() -> Self {
        CacheBackend::File
    }
}

impl std::str::FromStr for CacheBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "file" => Ok(CacheBackend::File),
            "redis" => Ok(CacheBackend::Redis),
            "none" | "off" => Ok(CacheBackend::None),
            other => Err(ConfigError::Message(format!("unknown cache backend '{other}'"))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheSettings {
    #[serde(default)]
    pub backend: CacheBackend,
    #[serde(default = "default_cache_dir")]
    pub dir: String,
    #[serde(default = "default_ttl_seconds")]
    pub balance_ttl_seconds: u64,
    #[serde(default = "default_ttl_seconds")]
    pub invalid_ttl_seconds: u64,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

fn default_cache_dir() -> String {
    ".cache/terra-balances".to_string()
}
fn default_ttl_seconds() -> u64 {
    300 // 5 minutes
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            dir: default_cache_dir(),
            balance_ttl_seconds: default_ttl_seconds(),
            invalid_ttl_seconds: default_ttl_seconds(),
            redis_url: default_redis_url(),
        }
    }
}

impl CacheSettings {
    pub fn balance_ttl(&self) -> Duration {
        Duration::from_secs(self.balance_ttl_seconds)
    }

    pub fn invalid_ttl(&self) -> Duration {
        Duration::from_secs(self.invalid_ttl_seconds)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistrySettings {
    #[serde(default = "default_assets_base_url")]
    pub assets_base_url: String,
    /// Public LCD used in place of the one published for `mainnet` in chains.json.
    #[serde(default = "default_mainnet_lcd_override")]
    pub mainnet_lcd_override: Option<String>,
}

fn default_assets_base_url() -> String {
    "https://assets.terra.dev".to_string()
}
fn default_mainnet_lcd_override() -> Option<String> {
    Some("https://terra-lcd.publicnode.com".to_string())
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            assets_base_url: default_assets_base_url(),
            mainnet_lcd_override: default_mainnet_lcd_override(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_chains() -> Vec<ChainConfig> {
    vec![
        ChainConfig {
            name: "classic".to_string(),
            chain_id: "columbus-5".to_string(),
            lcd: "https://terra-classic-lcd.publicnode.com".to_string(),
            mantle: Some("https://columbus-mantle.terra.dev".to_string()),
            hive: None,
        },
        ChainConfig {
            name: "mainnet".to_string(),
            chain_id: "phoenix-1".to_string(),
            lcd: "https://terra-lcd.publicnode.com".to_string(),
            mantle: None,
            hive: Some("https://phoenix-hive.terra.dev/graphql".to_string()),
        },
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default)]
    pub fetch: FetchSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub registry: RegistrySettings,
    #[serde(default = "default_chains")]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fetch: FetchSettings::default(),
            cache: CacheSettings::default(),
            registry: RegistrySettings::default(),
            chains: default_chains(),
            log: LogSettings::default(),
        }
    }
}

impl Settings {
    /// Loads `Config.toml` from the working directory if present, then applies
    /// `SDK_*` environment overrides.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_file("Config.toml", false)
    }

    pub fn from_file(path: &str, required: bool) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(required))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(raw) = env::var("SDK_CACHE_BACKEND") {
            if !raw.trim().is_empty() {
                self.cache.backend = raw.parse()?;
            }
        }
        if let Ok(dir) = env::var("SDK_CACHE_DIR") {
            let trimmed = dir.trim();
            if !trimmed.is_empty() {
                self.cache.dir = trimmed.to_string();
            }
        }
        if let Ok(url) = env::var("SDK_REDIS_URL") {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                self.cache.redis_url = trimmed.to_string();
            }
        }
        if let Ok(url) = env::var("SDK_ASSETS_BASE_URL") {
            let trimmed = url.trim();
            if !trimmed.is_empty() {
                self.registry.assets_base_url = trimmed.trim_end_matches('/').to_string();
            }
        }

        // Optional: full chain list override via ENV (JSON array of chain objects)
        if let Ok(raw_chains) = env::var("SDK_CHAINS") {
            let trimmed = raw_chains.trim();
            if !trimmed.is_empty() {
                match serde_json::from_str::<Vec<ChainConfig>>(trimmed) {
                    Ok(chains) if !chains.is_empty() => self.chains = chains,
                    Ok(_) => {}
                    Err(e) => {
                        return Err(ConfigError::Message(format!(
                            "Failed to parse SDK_CHAINS as JSON: {e}"
                        )))
                    }
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fetch = &self.fetch;
        if fetch.chunk_size == 0 || fetch.chunk_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::Message(format!(
                "fetch.chunk_size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                fetch.chunk_size
            )));
        }
        if fetch.max_attempts == 0 {
            return Err(ConfigError::Message("fetch.max_attempts must be at least 1".into()));
        }
        if fetch.batch_concurrency == 0 || fetch.fallback_concurrency == 0 {
            return Err(ConfigError::Message("fetch concurrency must be at least 1".into()));
        }
        if fetch.lcd_qps_limit == Some(0) {
            return Err(ConfigError::Message("fetch.lcd_qps_limit must be positive when set".into()));
        }
        Ok(())
    }
}
