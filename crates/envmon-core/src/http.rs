//! HTTP transport posting readings as JSON.
//!
//! Uses the blocking `reqwest` client. Construct and use it from a blocking
//! context (a plain thread or `tokio::task::spawn_blocking`), never from
//! inside an async task.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use tracing::debug;

use envmon_types::SensorReading;

use crate::error::{TransportError, TransportResult};
use crate::transport::{LinkStatus, Transport};

/// Default per-request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Default path readings are posted to.
pub const DEFAULT_READINGS_PATH: &str = "/api/readings";
/// Default path probed for reachability.
pub const DEFAULT_HEALTH_PATH: &str = "/api/health";

/// Header carrying the API key.
const API_KEY_HEADER: &str = "X-API-Key";

/// Transport delivering readings to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Option<Client>,
    base_url: String,
    readings_path: String,
    health_path: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for `base_url` (e.g. "http://collector.local:8080").
    pub fn new(base_url: &str) -> TransportResult<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(TransportError::InvalidConfig(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        Ok(Self {
            client: None,
            base_url,
            readings_path: DEFAULT_READINGS_PATH.to_string(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            api_key: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
        })
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn readings_path(mut self, path: impl Into<String>) -> Self {
        self.readings_path = path.into();
        self
    }

    #[must_use]
    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// The normalized base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn client(&mut self) -> TransportResult<&Client> {
        if self.client.is_none() {
            let client = Client::builder()
                .timeout(self.timeout)
                .connect_timeout(self.timeout)
                .build()
                .map_err(|e| TransportError::Init(e.to_string()))?;
            self.client = Some(client);
        }
        self.client
            .as_ref()
            .ok_or_else(|| TransportError::Init("HTTP client unavailable".to_string()))
    }
}

impl Transport for HttpTransport {
    fn initialize(&mut self) -> TransportResult<()> {
        self.client().map(|_| ())
    }

    fn probe(&mut self) -> TransportResult<LinkStatus> {
        let url = self.url(&self.health_path);
        let mut request = self.client()?.get(&url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        match request.send() {
            Ok(response) if response.status().is_success() => Ok(LinkStatus::Up),
            Ok(response) => {
                debug!("Health check {} returned {}", url, response.status());
                Ok(LinkStatus::Down)
            }
            Err(e) if e.is_connect() || e.is_timeout() => {
                debug!("Health check {} failed: {}", url, e);
                Ok(LinkStatus::Down)
            }
            Err(e) => Err(TransportError::Unreachable {
                endpoint: url,
                reason: e.to_string(),
            }),
        }
    }

    fn deliver(&mut self, reading: &SensorReading) -> TransportResult<()> {
        let url = self.url(&self.readings_path);
        let mut request = self.client()?.post(&url).json(reading);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request
            .send()
            .map_err(|e| TransportError::delivery(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(TransportError::delivery(
                format!("{} rejected the API key ({})", url, response.status()),
            )),
            status => Err(TransportError::delivery(format!(
                "{} returned {}",
                url, status
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("http {}", self.base_url)
    }
}
