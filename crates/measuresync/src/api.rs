//! Client for the remote measurement API.
//!
//! The sync engine talks to the API through the [`MeasurementApi`] trait;
//! [`HttpMeasurementApi`] is the reqwest-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::{Error, Result};
use crate::measurement::MeasurementPayload;

/// Path of the measurement collection, relative to the API root.
const MEASUREMENTS_PATH: &str = "measurements/";

/// Longest response body kept in a [`DeliveryError`].
const MAX_ERROR_BODY: usize = 200;

/// Why a measurement was not accepted by the remote API.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The request did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The request could not be sent or the response could not be read.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),

    /// The API answered with something other than `201 Created`.
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Start of the response body.
        body: String,
    },
}

impl DeliveryError {
    /// The HTTP status, if the API answered at all.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the remote API never answered.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }
}

/// The measurement resource as echoed back by the API.
///
/// Parsed leniently: every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreatedMeasurement {
    /// Server-assigned identifier.
    pub id: Option<i64>,
    /// Student reference.
    pub student: Option<i64>,
    /// Height as stored by the server.
    pub height: Option<f64>,
    /// Weight as stored by the server.
    pub weight: Option<f64>,
    /// Timestamp as stored by the server.
    pub timestamp: Option<String>,
}

/// A remote endpoint that accepts measurements.
#[async_trait]
pub trait MeasurementApi: Send + Sync + std::fmt::Debug {
    /// Submit one measurement.
    ///
    /// Returns `Ok` only when the API confirmed creation.
    ///
    /// # Errors
    ///
    /// Returns a [`DeliveryError`] for any other outcome.
    async fn create_measurement(
        &self,
        payload: &MeasurementPayload,
    ) -> std::result::Result<CreatedMeasurement, DeliveryError>;
}

/// HTTP client for `POST <base_url>measurements/`.
#[derive(Debug, Clone)]
pub struct HttpMeasurementApi {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpMeasurementApi {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// `timeout` bounds each request, connect included.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a valid URL or the HTTP client
    /// cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let endpoint = measurements_endpoint(base_url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("measuresync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpClient)?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// The URL measurements are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn map_error(&self, err: reqwest::Error) -> DeliveryError {
        if err.is_timeout() {
            DeliveryError::Timeout(self.timeout)
        } else {
            DeliveryError::Transport(err)
        }
    }
}

#[async_trait]
impl MeasurementApi for HttpMeasurementApi {
    async fn create_measurement(
        &self,
        payload: &MeasurementPayload,
    ) -> std::result::Result<CreatedMeasurement, DeliveryError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::UnexpectedStatus {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        // Creation is confirmed by the status alone.
        match response.json::<CreatedMeasurement>().await {
            Ok(created) => Ok(created),
            Err(e) => {
                debug!("Ignoring unreadable 201 body: {}", e);
                Ok(CreatedMeasurement::default())
            }
        }
    }
}

/// Resolve the measurement collection URL under `base_url`.
///
/// A missing trailing slash on the base is tolerated.
///
/// # Errors
///
/// Returns a validation error if `base_url` is not a valid URL.
pub fn measurements_endpoint(base_url: &str) -> Result<Url> {
    crate::config::validate_base_url(base_url)?;

    let mut base = base_url.trim().to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Url::parse(&base)
        .and_then(|url| url.join(MEASUREMENTS_PATH))
        .map_err(|e| Error::config_validation(format!("invalid base_url {base_url:?}: {e}")))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
