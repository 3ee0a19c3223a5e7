use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("device discovery failed for {url}: {message}")]
    Discovery { url: String, message: String },
    #[error("lineup fetch failed for {url}: {message}")]
    Lineup { url: String, message: String },
    #[error("guide window fetch failed (start={start}): {message}")]
    Window { start: i64, message: String },
}

/// Cache faults. `Read` and `Write` never cross the cache boundary — they are
/// logged and degraded to a miss / no-op so the pipeline can always proceed as
/// if caching were absent. `Clear` is the one fault callers must see.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache read failed for chunk {start}: {source}")]
    Read { start: i64, source: anyhow::Error },
    #[error("cache write failed for chunk {start}: {source}")]
    Write { start: i64, source: anyhow::Error },
    #[error("cache clear failed: {source}")]
    Clear { source: anyhow::Error },
}
