//! Presigned URL construction for AWS Signature Version 4.
//!
//! Presigned URLs carry authentication information in query parameters rather
//! than HTTP headers. The query parameters include:
//!
//! - `X-Amz-Algorithm` - Always `AWS4-HMAC-SHA256`
//! - `X-Amz-Credential` - `AKID/date/region/service/aws4_request`
//! - `X-Amz-Date` - ISO 8601 basic format timestamp (`YYYYMMDDTHHMMSSZ`)
//! - `X-Amz-Expires` - Validity duration in seconds
//! - `X-Amz-Security-Token` - Session token, for temporary credentials only
//! - `X-Amz-SignedHeaders` - Always `host`
//! - `X-Amz-Signature` - The hex-encoded signature
//!
//! For presigned URLs, the payload hash is always `UNSIGNED-PAYLOAD`.
//!
//! The `host` header is signed, so the host string used for signing must be the
//! one the HTTP client will send: a non-default port is part of it, a default
//! port is not.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::canonical::{build_canonical_query_string, build_canonical_request, encode_path};
use crate::error::AuthError;
use crate::sigv4::{
    ALGORITHM, SigningParams, UNSIGNED_PAYLOAD, build_string_to_sign, compute_signature,
};

/// Upper bound on `X-Amz-Expires` accepted by the store (7 days).
pub const MAX_EXPIRES_SECS: u64 = 604_800;

/// The scheme, host, and port a request is sent to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    scheme: String,
    host: String,
    port: Option<u16>,
}

impl Endpoint {
    /// Parse an endpoint URL such as `https://s3.example.com` or `http://localhost:9000`.
    ///
    /// Any path component is ignored. A port equal to the scheme's default is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidEndpoint`] if the URL cannot be parsed, or has
    /// no host or an unsupported scheme.
    pub fn parse(url: &str) -> Result<Self, AuthError> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e| AuthError::InvalidEndpoint(format!("{url}: {e}")))?;

        let scheme = uri.scheme_str().unwrap_or("https").to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(AuthError::InvalidEndpoint(format!(
                "{url}: unsupported scheme {scheme}"
            )));
        }

        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AuthError::InvalidEndpoint(format!("{url}: missing host")))?
            .to_ascii_lowercase();

        Ok(Self::new(scheme, host, uri.port_u16()))
    }

    /// The default AWS virtual-hosted-style endpoint for a bucket.
    #[must_use]
    pub fn virtual_hosted(bucket: &str, region: &str) -> Self {
        Self::new("https", format!("{bucket}.s3.{region}.amazonaws.com"), None)
    }

    fn new(scheme: impl Into<String>, host: impl Into<String>, port: Option<u16>) -> Self {
        let scheme = scheme.into();
        let default_port = if scheme == "http" { 80 } else { 443 };
        Self {
            scheme,
            host: host.into(),
            port: port.filter(|p| *p != default_port),
        }
    }

    /// The URL scheme.
    #[must_use]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The non-default port, if any.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The `host` header value: the host name plus any non-default port.
    #[must_use]
    pub fn host_header(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.host),
            None => self.host.clone(),
        }
    }

    /// `scheme://host[:port]`.
    #[must_use]
    pub fn origin(&self) -> String {
        format!("{}://{}", self.scheme, self.host_header())
    }
}

/// A request to presign.
#[derive(Debug, Clone)]
pub struct PresignRequest<'a> {
    /// HTTP method, e.g. `PUT`.
    pub method: &'a str,
    /// Where the request is sent.
    pub endpoint: &'a Endpoint,
    /// Raw (unencoded) resource path.
    pub path: &'a str,
    /// Raw (unencoded) operation parameters, e.g. `partNumber` and `uploadId`.
    pub query: Vec<(String, String)>,
    /// Validity duration in seconds.
    pub expires_in: u64,
}

impl<'a> PresignRequest<'a> {
    /// Create a request without operation parameters.
    #[must_use]
    pub fn new(method: &'a str, endpoint: &'a Endpoint, path: &'a str, expires_in: u64) -> Self {
        Self {
            method,
            endpoint,
            path,
            query: Vec::new(),
            expires_in,
        }
    }

    /// Add an operation parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A presigned URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedUrl {
    /// The complete URL, including the signature.
    pub url: String,
    /// The HTTP method the URL was signed for.
    pub method: String,
    /// When the URL stops being accepted.
    pub expires_at: DateTime<Utc>,
}

/// Build a presigned URL.
///
/// # Errors
///
/// Returns [`AuthError::InvalidExpiry`] if `expires_in` is zero or above
/// [`MAX_EXPIRES_SECS`], or [`AuthError::InvalidCredentials`] if the access key
/// or secret is empty.
pub fn presign(
    request: &PresignRequest<'_>,
    params: &SigningParams<'_>,
) -> Result<PresignedUrl, AuthError> {
    if request.expires_in == 0 || request.expires_in > MAX_EXPIRES_SECS {
        return Err(AuthError::InvalidExpiry(request.expires_in));
    }
    if params.access_key_id.is_empty() || params.secret_access_key.is_empty() {
        return Err(AuthError::InvalidCredentials);
    }

    let timestamp = params.timestamp();

    let mut query = request.query.clone();
    query.push(("X-Amz-Algorithm".to_owned(), ALGORITHM.to_owned()));
    query.push(("X-Amz-Credential".to_owned(), params.credential()));
    query.push(("X-Amz-Date".to_owned(), timestamp.clone()));
    query.push(("X-Amz-Expires".to_owned(), request.expires_in.to_string()));
    if let Some(token) = params.session_token {
        query.push(("X-Amz-Security-Token".to_owned(), token.to_owned()));
    }
    query.push(("X-Amz-SignedHeaders".to_owned(), "host".to_owned()));

    let canonical_uri = encode_path(request.path);
    let canonical_query = build_canonical_query_string(&query);
    let host = request.endpoint.host_header();

    let canonical_request = build_canonical_request(
        request.method,
        &canonical_uri,
        &canonical_query,
        &format!("host:{host}"),
        "host",
        UNSIGNED_PAYLOAD,
    );

    debug!(canonical_request, "Built presigned canonical request");

    let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    let string_to_sign =
        build_string_to_sign(&timestamp, &params.credential_scope(), &canonical_hash);
    let signature = compute_signature(&params.signing_key(), &string_to_sign);

    let expires_secs = i64::try_from(request.expires_in)
        .map_err(|_| AuthError::InvalidExpiry(request.expires_in))?;

    Ok(PresignedUrl {
        url: format!(
            "{}{canonical_uri}?{canonical_query}&X-Amz-Signature={signature}",
            request.endpoint.origin()
        ),
        method: request.method.to_owned(),
        expires_at: params.time + Duration::seconds(expires_secs),
    })
}
