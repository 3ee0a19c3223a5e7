use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tuner: TunerConfig,
    #[serde(default)]
    pub guide: GuideConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tuner: TunerConfig::default(),
            guide: GuideConfig::default(),
            cache: CacheConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TunerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_guide_api_url")]
    pub guide_api_url: String,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            guide_api_url: default_guide_api_url(),
        }
    }
}

fn default_host() -> String {
    "hdhomerun.local".to_string()
}
fn default_guide_api_url() -> String {
    "https://api.hdhomerun.com".to_string()
}

#[derive(Debug, Deserialize)]
pub struct GuideConfig {
    /// Total guide span to cover, in days.
    #[serde(default = "default_days")]
    pub days: u32,
    /// Window granularity in hours; also the cache-key alignment unit.
    #[serde(default = "default_hours")]
    pub hours: u32,
    #[serde(default = "default_output_filename")]
    pub output_filename: PathBuf,
    /// IANA timezone name used for XMLTV timestamps.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for GuideConfig {
    fn default() -> Self {
        Self {
            days: default_days(),
            hours: default_hours(),
            output_filename: default_output_filename(),
            timezone: default_timezone(),
        }
    }
}

fn default_days() -> u32 {
    4
}
fn default_hours() -> u32 {
    2
}
fn default_output_filename() -> PathBuf {
    PathBuf::from("epg.xml")
}
fn default_timezone() -> String {
    "UTC".to_string()
}

#[derive(Debug, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,
    /// Freshness window for cached chunks (humantime string, e.g. "24h").
    #[serde(default = "default_cache_ttl")]
    pub ttl: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            path: default_cache_path(),
            ttl: default_cache_ttl(),
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}
fn default_cache_path() -> PathBuf {
    PathBuf::from("epg_cache.db")
}
fn default_cache_ttl() -> String {
    "24h".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn tuner_base_url(&self) -> String {
        format!("http://{}", self.tuner.host)
    }

    pub fn cache_ttl(&self) -> Duration {
        // Validated at startup; fall back to the default if called unvalidated.
        humantime::parse_duration(&self.cache.ttl).unwrap_or(Duration::from_secs(86400))
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.guide.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        // Running without a config file is fine — every field has a default.
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(ConfigError::ReadFile)
        .context("reading config file")?;
    let config: Config = toml::from_str(&content).map_err(ConfigError::Parse)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.tuner.host.is_empty() {
        return Err(ConfigError::Validation("tuner host must not be empty".to_string()).into());
    }

    if config.guide.days < 1 {
        return Err(ConfigError::Validation("guide days must be at least 1".to_string()).into());
    }

    if config.guide.hours < 1 || config.guide.hours > 24 {
        return Err(ConfigError::Validation(format!(
            "guide hours must be between 1 and 24, got {}",
            config.guide.hours
        ))
        .into());
    }

    config
        .guide
        .timezone
        .parse::<chrono_tz::Tz>()
        .map_err(|_| ConfigError::Validation(format!("unknown timezone '{}'", config.guide.timezone)))?;

    humantime::parse_duration(&config.cache.ttl)
        .map_err(|e| ConfigError::Validation(format!("invalid cache ttl '{}': {}", config.cache.ttl, e)))?;

    config
        .server
        .listen
        .parse::<std::net::SocketAddr>()
        .map_err(|_| ConfigError::Validation(format!("invalid listen address '{}'", config.server.listen)))?;

    if !config.tuner.guide_api_url.starts_with("http://") && !config.tuner.guide_api_url.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "guide_api_url must be an http(s) URL, got '{}'",
            config.tuner.guide_api_url
        ))
        .into());
    }

    Ok(())
}
