//! HTTP utilities for Azure management API calls

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Network reads never block longer than this.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Mutations get a longer bound; rule writes can be slow to settle.
pub const MUTATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and masks potentially sensitive patterns
pub(crate) fn sanitize_for_log(body: &str) -> String {
    // Strip first: after this every char is single-byte ASCII, so the
    // truncation slice below cannot land inside a multibyte char.
    let cleaned = body.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "");

    if cleaned.len() > MAX_LOG_BODY_LENGTH {
        format!(
            "{}... [truncated, {} bytes total]",
            &cleaned[..MAX_LOG_BODY_LENGTH],
            body.len()
        )
    } else {
        cleaned
    }
}

/// A response that reached the management API.
///
/// Any status lands here as `Ok`; callers own the mapping of non-2xx
/// statuses into their error taxonomy. `Err` from the calls below always
/// means the request never completed.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> Result<Value> {
        serde_json::from_str(&self.body).context("Failed to parse response JSON")
    }
}

/// HTTP client wrapper for management API calls
#[derive(Clone)]
pub struct ManagementHttp {
    client: Client,
}

impl ManagementHttp {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("azdiag/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make a GET request with bearer auth, bounded by `timeout`
    pub async fn get(&self, url: &str, token: &str, timeout: Duration) -> Result<ApiResponse> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .timeout(timeout)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
        }

        Ok(ApiResponse { status, body })
    }

    /// Make a PUT request with a JSON body and bearer auth, bounded by `timeout`
    pub async fn put_json(
        &self,
        url: &str,
        token: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<ApiResponse> {
        tracing::debug!("PUT {}", url);

        let response = self
            .client
            .put(url)
            .bearer_auth(token)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&response_body));
        }

        Ok(ApiResponse {
            status,
            body: response_body,
        })
    }
}
