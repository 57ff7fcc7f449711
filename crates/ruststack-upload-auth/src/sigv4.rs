//! AWS Signature Version 4 signing.
//!
//! This module implements the signing flow for header-authenticated requests:
//!
//! 1. Add the `x-amz-date`, `x-amz-content-sha256` and (when present)
//!    `x-amz-security-token` headers.
//! 2. Build the canonical request from the method, encoded path, query and headers.
//! 3. Build the string to sign from the timestamp, credential scope, and canonical request hash.
//! 4. Derive the signing key using HMAC-SHA256 from the secret key and credential scope components.
//! 5. Compute the signature and assemble the `Authorization` header.
//!
//! The main entry point is [`sign_request`]. Query-authenticated URLs are built
//! by [`crate::presigned::presign`] on top of the same primitives.

use chrono::{DateTime, Utc};
use hmac::{Hmac, KeyInit, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::canonical::{
    build_canonical_headers, build_canonical_query_string, build_canonical_request, encode_path,
};

/// The signing algorithm identifier.
pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// The payload hash placeholder for bodies that are not hashed.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Terminator of every credential scope.
const SCOPE_TERMINATOR: &str = "aws4_request";

type HmacSha256 = Hmac<Sha256>;

/// How the request body participates in the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadHash {
    /// The body is not hashed (`UNSIGNED-PAYLOAD`).
    Unsigned,
    /// Hex-encoded SHA-256 of the body.
    Sha256(String),
}

impl PayloadHash {
    /// Hash the given body.
    #[must_use]
    pub fn of(payload: &[u8]) -> Self {
        Self::Sha256(hash_payload(payload))
    }

    /// The value placed in the canonical request and `x-amz-content-sha256`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unsigned => UNSIGNED_PAYLOAD,
            Self::Sha256(hash) => hash,
        }
    }
}

/// Credential material and scope used to sign a single request.
#[derive(Clone, Copy)]
pub struct SigningParams<'a> {
    /// The access key ID.
    pub access_key_id: &'a str,
    /// The secret access key.
    pub secret_access_key: &'a str,
    /// Session token of temporary credentials.
    pub session_token: Option<&'a str>,
    /// Region of the credential scope.
    pub region: &'a str,
    /// Service of the credential scope (e.g. `s3`).
    pub service: &'a str,
    /// The signing time.
    pub time: DateTime<Utc>,
}

impl std::fmt::Debug for SigningParams<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningParams")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.map(|_| "<redacted>"))
            .field("region", &self.region)
            .field("service", &self.service)
            .field("time", &self.time)
            .finish()
    }
}

impl SigningParams<'_> {
    /// The ISO 8601 basic format timestamp (`YYYYMMDDTHHMMSSZ`).
    #[must_use]
    pub fn timestamp(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    /// The date component of the credential scope (`YYYYMMDD`).
    #[must_use]
    pub fn date(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    /// The credential scope, `date/region/service/aws4_request`.
    #[must_use]
    pub fn credential_scope(&self) -> String {
        format!(
            "{}/{}/{}/{SCOPE_TERMINATOR}",
            self.date(),
            self.region,
            self.service
        )
    }

    /// The `X-Amz-Credential` value, `AKID/<credential scope>`.
    #[must_use]
    pub fn credential(&self) -> String {
        format!("{}/{}", self.access_key_id, self.credential_scope())
    }

    /// Derive the signing key for this scope.
    #[must_use]
    pub fn signing_key(&self) -> Vec<u8> {
        derive_signing_key(
            self.secret_access_key,
            &self.date(),
            self.region,
            self.service,
        )
    }
}

/// An HTTP request to be signed with header authentication.
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    /// HTTP method.
    pub method: &'a str,
    /// Raw (unencoded) resource path.
    pub path: &'a str,
    /// Raw (unencoded) query parameters.
    pub query: Vec<(String, String)>,
    /// Headers to sign; must include `host`.
    pub headers: Vec<(String, String)>,
    /// Payload hash policy.
    pub payload: PayloadHash,
}

/// The result of signing a request.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    /// The canonical request that was signed.
    pub canonical_request: String,
    /// The string to sign.
    pub string_to_sign: String,
    /// The hex-encoded signature.
    pub signature: String,
    /// The `Authorization` header value.
    pub authorization: String,
    /// All headers to send, including the added `x-amz-*` headers and `authorization`.
    pub headers: Vec<(String, String)>,
}

/// Sign a request using the `Authorization` header.
///
/// `x-amz-date` and `x-amz-content-sha256` are added unless already present, and
/// `x-amz-security-token` is added for temporary credentials.
#[must_use]
pub fn sign_request(request: &SigningRequest<'_>, params: &SigningParams<'_>) -> SignedRequest {
    let timestamp = params.timestamp();
    let mut headers = request.headers.clone();
    add_header_if_absent(&mut headers, "x-amz-date", &timestamp);
    add_header_if_absent(
        &mut headers,
        "x-amz-content-sha256",
        request.payload.as_str(),
    );
    if let Some(token) = params.session_token {
        add_header_if_absent(&mut headers, "x-amz-security-token", token);
    }

    let header_refs: Vec<(&str, &str)> = headers
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let canonical_headers = build_canonical_headers(&header_refs);

    let canonical_request = build_canonical_request(
        request.method,
        &encode_path(request.path),
        &build_canonical_query_string(&request.query),
        &canonical_headers.canonical,
        &canonical_headers.signed,
        request.payload.as_str(),
    );

    debug!(canonical_request, "Built canonical request");

    let canonical_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
    let string_to_sign =
        build_string_to_sign(&timestamp, &params.credential_scope(), &canonical_hash);
    let signature = compute_signature(&params.signing_key(), &string_to_sign);

    let authorization = format!(
        "{ALGORITHM} Credential={},SignedHeaders={},Signature={signature}",
        params.credential(),
        canonical_headers.signed
    );
    headers.push(("authorization".to_owned(), authorization.clone()));

    SignedRequest {
        canonical_request,
        string_to_sign,
        signature,
        authorization,
        headers,
    }
}

fn add_header_if_absent(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name)) {
        headers.push((name.to_owned(), value.to_owned()));
    }
}

/// Build the SigV4 string to sign.
///
/// Format:
/// ```text
/// AWS4-HMAC-SHA256\n
/// <ISO8601 timestamp>\n
/// <credential_scope>\n
/// <hex(SHA256(canonical_request))>
/// ```
#[must_use]
pub fn build_string_to_sign(
    timestamp: &str,
    credential_scope: &str,
    canonical_request_hash: &str,
) -> String {
    format!("{ALGORITHM}\n{timestamp}\n{credential_scope}\n{canonical_request_hash}")
}

/// Derive the SigV4 signing key using HMAC-SHA256 chain.
///
/// ```text
/// DateKey              = HMAC-SHA256("AWS4" + secret_key, date)
/// DateRegionKey        = HMAC-SHA256(DateKey, region)
/// DateRegionServiceKey = HMAC-SHA256(DateRegionKey, service)
/// SigningKey           = HMAC-SHA256(DateRegionServiceKey, "aws4_request")
/// ```
#[must_use]
pub fn derive_signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let date_key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date.as_bytes());
    let date_region_key = hmac_sha256(&date_key, region.as_bytes());
    let date_region_service_key = hmac_sha256(&date_region_key, service.as_bytes());
    hmac_sha256(&date_region_service_key, SCOPE_TERMINATOR.as_bytes())
}

/// Compute the hex-encoded HMAC-SHA256 signature of `data`.
#[must_use]
pub fn compute_signature(signing_key: &[u8], data: &str) -> String {
    hex::encode(hmac_sha256(signing_key, data.as_bytes()))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can accept keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Compute the SHA-256 hash of the given payload and return it as a hex string.
///
/// # Examples
///
/// ```
/// use ruststack_upload_auth::sigv4::hash_payload;
///
/// assert_eq!(
///     hash_payload(b""),
///     "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
/// );
/// ```
#[must_use]
pub fn hash_payload(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}
