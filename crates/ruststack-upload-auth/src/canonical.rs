//! Canonical request construction for AWS Signature Version 4.
//!
//! This module builds the canonical request format as specified by AWS:
//!
//! ```text
//! HTTPRequestMethod\n
//! CanonicalURI\n
//! CanonicalQueryString\n
//! CanonicalHeaders\n\n
//! SignedHeaders\n
//! HashedPayload
//! ```
//!
//! Unlike a verifier, which has to reproduce whatever encoding the client put on
//! the wire, the signing side owns the encoding: paths, query keys and query
//! values are encoded exactly once here, and the same encoded strings are used
//! both in the canonical request and in the URL that is sent. Any divergence
//! between the two is reported by the store as a signature mismatch.

use std::collections::BTreeMap;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// The set of characters that must be percent-encoded.
///
/// Per AWS SigV4 spec, all characters except unreserved characters
/// (A-Z, a-z, 0-9, `-`, `_`, `.`, `~`) must be encoded.
const URI_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Build the full canonical request string from already-canonicalized components.
///
/// # Examples
///
/// ```
/// use ruststack_upload_auth::canonical::build_canonical_request;
///
/// let canonical = build_canonical_request(
///     "GET",
///     "/test.txt",
///     "",
///     "host:examplebucket.s3.amazonaws.com",
///     "host",
///     "UNSIGNED-PAYLOAD",
/// );
/// assert!(canonical.starts_with("GET\n/test.txt\n\nhost:"));
/// ```
#[must_use]
pub fn build_canonical_request(
    method: &str,
    canonical_uri: &str,
    canonical_query: &str,
    canonical_headers: &str,
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n\n{signed_headers}\n{payload_hash}"
    )
}

/// Encode a raw resource path, segment by segment.
///
/// Forward slashes are preserved and an empty path becomes `/`. The input is
/// treated as raw text: a literal `%` is encoded as `%25`, so decoding the
/// result always reproduces the input exactly.
///
/// # Examples
///
/// ```
/// use ruststack_upload_auth::canonical::encode_path;
///
/// assert_eq!(encode_path("/photos/my cat (1).jpg"), "/photos/my%20cat%20%281%29.jpg");
/// assert_eq!(encode_path(""), "/");
/// ```
#[must_use]
pub fn encode_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_owned();
    }

    let encoded = path
        .split('/')
        .map(uri_encode)
        .collect::<Vec<_>>()
        .join("/");

    if encoded.starts_with('/') {
        encoded
    } else {
        format!("/{encoded}")
    }
}

/// Build the canonical query string from raw (unencoded) parameters.
///
/// Keys and values are encoded, then sorted by encoded key and, for duplicate
/// keys, by encoded value.
///
/// # Examples
///
/// ```
/// use ruststack_upload_auth::canonical::build_canonical_query_string;
///
/// let params = vec![
///     ("uploadId".to_owned(), "a/b".to_owned()),
///     ("partNumber".to_owned(), "3".to_owned()),
/// ];
/// assert_eq!(build_canonical_query_string(&params), "partNumber=3&uploadId=a%2Fb");
/// ```
#[must_use]
pub fn build_canonical_query_string(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();

    encoded.sort_unstable();

    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Canonical headers and the matching signed-headers list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalHeaders {
    /// `name:value` lines joined by `\n`, without a trailing newline.
    pub canonical: String,
    /// Semicolon-separated lowercase header names.
    pub signed: String,
}

/// Canonicalize every given header and sign all of them.
///
/// Header names are lowercased, values are trimmed and consecutive whitespace is
/// collapsed to a single space. Repeated headers are joined with commas. The
/// output is sorted by header name.
///
/// # Examples
///
/// ```
/// use ruststack_upload_auth::canonical::build_canonical_headers;
///
/// let headers = build_canonical_headers(&[("X-Amz-Date", "20130524T000000Z"), ("Host", " example.com ")]);
/// assert_eq!(headers.canonical, "host:example.com\nx-amz-date:20130524T000000Z");
/// assert_eq!(headers.signed, "host;x-amz-date");
/// ```
#[must_use]
pub fn build_canonical_headers(headers: &[(&str, &str)]) -> CanonicalHeaders {
    let mut header_map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let lower_name = name.to_lowercase();
        let trimmed_value = collapse_whitespace(value.trim());
        header_map
            .entry(lower_name)
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(&trimmed_value);
            })
            .or_insert(trimmed_value);
    }

    let canonical = header_map
        .iter()
        .map(|(name, value)| format!("{name}:{value}"))
        .collect::<Vec<_>>()
        .join("\n");
    let signed = header_map.keys().cloned().collect::<Vec<_>>().join(";");

    CanonicalHeaders { canonical, signed }
}

/// URI-encode a string using the AWS SigV4 encoding rules (`/` included).
#[must_use]
pub fn uri_encode(input: &str) -> String {
    utf8_percent_encode(input, URI_ENCODE_SET).to_string()
}

fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(ch);
            prev_was_space = false;
        }
    }
    result
}
