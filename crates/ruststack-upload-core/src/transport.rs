//! Part data transport.
//!
//! [`PartTransport`] sends the bytes of one part to a presigned URL and returns
//! the `ETag` the store assigned. [`HttpPartTransport`] does so over HTTP with
//! `reqwest`, classifying failures into the engine's error taxonomy.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::UploadError;

/// A request the store will accept without further credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedRequest {
    /// Full URL, including the signature query parameters.
    pub url: String,
    /// HTTP method, normally `PUT`.
    #[serde(default = "default_method")]
    pub method: String,
    /// Headers that must accompany the request.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

fn default_method() -> String {
    "PUT".to_owned()
}

impl PresignedRequest {
    /// A `PUT` of `url` without extra headers.
    pub fn put(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: Vec::new(),
        }
    }
}

impl From<ruststack_upload_auth::PresignedUrl> for PresignedRequest {
    fn from(presigned: ruststack_upload_auth::PresignedUrl) -> Self {
        Self {
            url: presigned.url,
            method: presigned.method,
            headers: Vec::new(),
        }
    }
}

/// Sends part bodies to the object store.
#[async_trait]
pub trait PartTransport: Send + Sync {
    /// Send `body` as described by `request` and return the store's `ETag`.
    ///
    /// # Errors
    ///
    /// [`UploadError::Transport`] for connection failures and timeouts,
    /// [`UploadError::Authentication`] for rejected signatures, and
    /// [`UploadError::ServerRejection`] for any other refusal.
    async fn send_part(&self, request: &PresignedRequest, body: Bytes) -> Result<String, UploadError>;
}

/// [`PartTransport`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPartTransport {
    client: reqwest::Client,
}

impl HttpPartTransport {
    /// Create a transport whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Internal`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, UploadError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PartTransport for HttpPartTransport {
    async fn send_part(&self, request: &PresignedRequest, body: Bytes) -> Result<String, UploadError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| UploadError::ServerRejection(format!("invalid method {}", request.method)))?;
        let len = body.len();

        let mut builder = self.client.request(method, &request.url).body(body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(classify_send_error)?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| {
                UploadError::ServerRejection(
                    "response has no readable ETag header (is it exposed via CORS?)".to_owned(),
                )
            })?;
        debug!(bytes = len, etag = %etag, "Part accepted");
        Ok(etag)
    }
}

fn classify_send_error(err: reqwest::Error) -> UploadError {
    if err.is_builder() {
        UploadError::ServerRejection(format!("invalid part request: {err}"))
    } else {
        UploadError::Transport(err.to_string())
    }
}

fn classify_status(status: StatusCode, detail: &str) -> UploadError {
    let message = if detail.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {detail}")
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UploadError::Authentication(message),
        _ => UploadError::ServerRejection(message),
    }
}
