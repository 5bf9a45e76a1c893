//! HTTP sink
//!
//! POSTs each batch as a JSON array of artifacts to the scanner's ingest
//! endpoint.

use super::{Batch, Transport};
use crate::config::TransportAuth;
use crate::error::TransportError;
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode, header};
use std::time::Duration;
use url::Url;

/// Delivers batches to an HTTP endpoint
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    endpoint: Url,
}

impl HttpTransport {
    /// Build the sink with a per-request timeout and optional auth header.
    ///
    /// # Errors
    /// Returns a terminal error if the auth header is not a valid header value
    /// or the HTTP client cannot be built.
    pub fn try_new(
        endpoint: Url,
        timeout: Duration,
        auth: Option<&TransportAuth>,
    ) -> Result<Self, TransportError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        match auth {
            Some(TransportAuth::Basic { username, password }) => {
                let credentials = base64::engine::general_purpose::STANDARD
                    .encode(format!("{}:{}", username, password));
                headers.append(header::AUTHORIZATION, header_value(format!("Basic {}", credentials))?);
            }
            Some(TransportAuth::Apikey(apikey)) => {
                headers.append(header::AUTHORIZATION, header_value(format!("ApiKey {}", apikey))?);
            }
            Some(TransportAuth::Bearer(token)) => {
                headers.append(header::AUTHORIZATION, header_value(format!("Bearer {}", token))?);
            }
            None => {}
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Terminal(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

fn header_value(value: String) -> Result<header::HeaderValue, TransportError> {
    let mut value = header::HeaderValue::from_str(&value)
        .map_err(|e| TransportError::Terminal(format!("invalid auth header: {}", e)))?;
    value.set_sensitive(true);
    Ok(value)
}

/// 5xx, 408 and 429 are worth retrying; every other non-success is final
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn deliver(&self, batch: &Batch) -> Result<(), TransportError> {
        log::debug!(
            "POST batch {} of {}:{} ({} artifacts) to {}",
            batch.sequence,
            batch.provider,
            batch.service,
            batch.len(),
            self.endpoint
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("X-Inventory-Job-Id", batch.job_id.to_string())
            .header("X-Inventory-Batch", batch.sequence.to_string())
            .json(&batch.artifacts)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("{} responded {}: {}", self.endpoint, status, body);
        if is_retryable_status(status) {
            Err(TransportError::Retryable(message))
        } else {
            Err(TransportError::Terminal(message))
        }
    }
}
