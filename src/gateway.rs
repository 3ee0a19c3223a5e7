use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::GatewayError;
use crate::models::{GuideChannelRecord, LineupEntry};

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const WINDOW_TIMEOUT: Duration = Duration::from_secs(30);

/// Network access to the tuner's local API and the cloud guide API. The
/// device auth token is discovered lazily on first use and held for the
/// lifetime of this instance only.
pub struct Gateway {
    tuner_base_url: String,
    guide_api_url: String,
    /// Plain client for the tuner's LAN endpoints.
    tuner_client: Client,
    /// Client for the cloud guide API. Certificate validation is disabled on
    /// purpose: the legacy device ecosystem serves non-standard certificates.
    guide_client: Client,
    device_auth: Option<String>,
}

impl Gateway {
    pub fn new(config: &Config) -> Result<Self, GatewayError> {
        Self::with_base_urls(&config.tuner_base_url(), &config.tuner.guide_api_url)
    }

    pub fn with_base_urls(tuner_base_url: &str, guide_api_url: &str) -> Result<Self, GatewayError> {
        let user_agent = concat!("hdhomerun-epg/", env!("CARGO_PKG_VERSION"));

        let tuner_client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| GatewayError::Discovery {
                url: tuner_base_url.to_string(),
                message: format!("building HTTP client: {e}"),
            })?;

        let guide_client = Client::builder()
            .user_agent(user_agent)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| GatewayError::Discovery {
                url: guide_api_url.to_string(),
                message: format!("building HTTP client: {e}"),
            })?;

        Ok(Self {
            tuner_base_url: tuner_base_url.trim_end_matches('/').to_string(),
            guide_api_url: guide_api_url.trim_end_matches('/').to_string(),
            tuner_client,
            guide_client,
            device_auth: None,
        })
    }

    /// Discover the device auth token. Idempotent: repeated calls after a
    /// successful discovery are no-ops.
    pub async fn ensure_authenticated(&mut self) -> Result<(), GatewayError> {
        if self.device_auth.is_none() {
            let url = format!("{}/discover.json", self.tuner_base_url);
            debug!(url = %url, "discovering device auth");

            let body: Value = self
                .tuner_client
                .get(&url)
                .timeout(DISCOVERY_TIMEOUT)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| GatewayError::Discovery {
                    url: url.clone(),
                    message: e.to_string(),
                })?
                .json()
                .await
                .map_err(|e| GatewayError::Discovery {
                    url: url.clone(),
                    message: format!("invalid discovery response: {e}"),
                })?;

            let token = body
                .get("DeviceAuth")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::Discovery {
                    url,
                    message: "DeviceAuth not found in discovery response".to_string(),
                })?
                .to_string();

            info!(token = %mask_token(&token), "discovered device auth");
            self.device_auth = Some(token);
        }

        Ok(())
    }

    /// The discovered token, if `ensure_authenticated` has succeeded.
    pub fn device_auth(&self) -> Option<&str> {
        self.device_auth.as_deref()
    }

    /// Fetch the tuned channel list, in the order the tuner returns it.
    /// Triggers discovery when no token has been resolved yet.
    pub async fn list_channels(&mut self) -> Result<Vec<LineupEntry>, GatewayError> {
        self.ensure_authenticated().await?;

        let url = format!("{}/lineup.json", self.tuner_base_url);
        debug!(url = %url, "fetching tuner lineup");

        let lineup: Vec<LineupEntry> = self
            .tuner_client
            .get(&url)
            .timeout(DISCOVERY_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GatewayError::Lineup {
                url: url.clone(),
                message: e.to_string(),
            })?
            .json()
            .await
            .map_err(|e| GatewayError::Lineup {
                url: url.clone(),
                message: format!("invalid lineup response: {e}"),
            })?;

        info!(channels = lineup.len(), "fetched tuner lineup");
        Ok(lineup)
    }

    /// Fetch one guide window's raw per-channel records for all channels.
    /// Requires a discovered token; no retries happen here.
    pub async fn fetch_window(&self, start_time: i64) -> Result<Vec<GuideChannelRecord>, GatewayError> {
        let token = self.device_auth.as_deref().ok_or(GatewayError::Window {
            start: start_time,
            message: "device auth not discovered".to_string(),
        })?;

        let url = format!(
            "{}/api/guide.php?DeviceAuth={}&Start={}",
            self.guide_api_url, token, start_time
        );
        debug!(start = start_time, "fetching guide window");

        let response = self
            .guide_client
            .get(&url)
            .timeout(WINDOW_TIMEOUT)
            .send()
            .await
            .map_err(|e| GatewayError::Window {
                start: start_time,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            // Surface the response body when the upstream sent one.
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Window {
                start: start_time,
                message: format!("HTTP {status}: {body}"),
            });
        }

        let records: Vec<GuideChannelRecord> = response.json().await.map_err(|e| GatewayError::Window {
            start: start_time,
            message: format!("invalid guide response: {e}"),
        })?;

        Ok(records)
    }
}

fn mask_token(token: &str) -> String {
    if token.len() > 8 {
        format!("{}***{}", &token[..4], &token[token.len() - 4..])
    } else {
        "***".to_string()
    }
}
