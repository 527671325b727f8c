use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::domain::models::{ChargingSession, ChargingStatus, MeterValue};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[allow(async_fn_in_trait)]
pub trait ChargingBackend: Clone + 'static {
    /// `Ok(None)` means the device has no active session.
    async fn get_current_status(
        &self,
        device_id: &str,
    ) -> Result<Option<ChargingStatus>, BackendError>;
    async fn get_sessions(&self, device_id: &str) -> Result<Vec<ChargingSession>, BackendError>;
    async fn get_meter_values(&self, session_id: i64) -> Result<Vec<MeterValue>, BackendError>;
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("backend answered {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl BackendError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Request { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpChargingBackend {
    client: Client,
    base_url: Url,
}

impl HttpChargingBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let parsed = Url::parse(base_url).map_err(|error| BackendError::InvalidUrl {
            url: base_url.to_string(),
            reason: error.to_string(),
        })?;
        if parsed.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl {
                url: base_url.to_string(),
                reason: "url cannot be used as a base".to_string(),
            });
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(BackendError::Client)?;

        Ok(Self {
            client,
            base_url: parsed,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "url cannot be used as a base".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, url: &Url) -> Result<reqwest::Response, BackendError> {
        tracing::debug!(url = %url, "backend request");

        self.client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| BackendError::Request {
                url: url.to_string(),
                source,
            })
    }

    async fn decode<T: DeserializeOwned>(
        url: &Url,
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| BackendError::Decode {
                url: url.to_string(),
                source,
            })
    }
}

impl ChargingBackend for HttpChargingBackend {
    async fn get_current_status(
        &self,
        device_id: &str,
    ) -> Result<Option<ChargingStatus>, BackendError> {
        let url = self.endpoint(&["status", "current", device_id])?;
        let response = self.send(&url).await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(device_id, "no active session");
            return Ok(None);
        }

        Self::decode(&url, response).await.map(Some)
    }

    async fn get_sessions(&self, device_id: &str) -> Result<Vec<ChargingSession>, BackendError> {
        let url = self.endpoint(&["status", "sessions", device_id])?;
        let response = self.send(&url).await?;
        Self::decode(&url, response).await
    }

    async fn get_meter_values(&self, session_id: i64) -> Result<Vec<MeterValue>, BackendError> {
        let session_id = session_id.to_string();
        let url = self.endpoint(&["status", "meter-values", &session_id])?;
        let response = self.send(&url).await?;
        Self::decode(&url, response).await
    }
}
