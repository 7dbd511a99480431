//! Response envelope.
//!
//! Wraps one HTTP response: status, URLs, headers and the buffered body.
//! Decoded JSON (with timestamp fields coerced) is computed on first access
//! and cached for the life of the envelope.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, CONTENT_TYPE};
use reqwest::{Response, StatusCode, Url};
use tracing::warn;

use tass_core::constants::{self, media, odata};
use tass_core::error::{TassError, TassResult};
use tass_core::json::{decode_with_datetimes, Value};

use crate::transport::classify_error;

/// Error detail fields copied from an API error body.
const ERROR_FIELDS: [&str; 4] = ["title", "detail", "errors", "message"];

/// Algorithm and hex-encoded value from a `Digest` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestData {
    /// Algorithm name as sent, e.g. `sha-256`.
    pub algorithm: String,
    /// Lowercase hex digest.
    pub hex: String,
}

/// One HTTP response plus the statuses the caller accepts for it.
pub struct ResponseEnvelope {
    status: u16,
    url: Url,
    requested_url: Url,
    headers: HeaderMap,
    body: Bytes,
    safe_statuses: BTreeSet<u16>,
    data: OnceLock<Value>,
}

impl ResponseEnvelope {
    /// Build from already-received parts.
    pub fn from_parts(
        status: u16,
        url: Url,
        requested_url: Url,
        headers: HeaderMap,
        body: impl Into<Bytes>,
        safe_statuses: BTreeSet<u16>,
    ) -> Self {
        Self {
            status,
            url,
            requested_url,
            headers,
            body: body.into(),
            safe_statuses,
            data: OnceLock::new(),
        }
    }

    /// Capture status, URL and headers without consuming the body.
    pub fn head(response: &Response, requested_url: Url, safe_statuses: BTreeSet<u16>) -> Self {
        Self::from_parts(
            response.status().as_u16(),
            response.url().clone(),
            requested_url,
            response.headers().clone(),
            Bytes::new(),
            safe_statuses,
        )
    }

    /// Buffer the whole body of `response`.
    pub async fn read(
        response: Response,
        requested_url: Url,
        safe_statuses: BTreeSet<u16>,
    ) -> TassResult<Self> {
        let envelope = Self::head(&response, requested_url, safe_statuses);
        let body = response.bytes().await.map_err(classify_error)?;
        Ok(envelope.with_body(body))
    }

    /// Replace the body, dropping any cached decode.
    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self.data = OnceLock::new();
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// URL of the final response, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// URL of the request as first sent, including its query.
    pub fn requested_url(&self) -> &Url {
        &self.requested_url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn header_str(&self, name: impl reqwest::header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether `Content-Type` names JSON.
    pub fn has_json(&self) -> bool {
        self.header_str(CONTENT_TYPE)
            .map(|ct| ct.to_ascii_lowercase().contains(media::JSON))
            .unwrap_or(false)
    }

    /// Decoded body with timestamp fields coerced. Cached after the first call.
    ///
    /// An empty array when the response is not JSON; `Null` when the body does
    /// not decode.
    pub fn data(&self) -> &Value {
        self.data.get_or_init(|| {
            if !self.has_json() {
                return Value::Array(Vec::new());
            }
            decode_with_datetimes(&self.body).unwrap_or_else(|e| {
                warn!("undecodable JSON body from {}: {e}", self.url);
                Value::Null
            })
        })
    }

    /// The records of a page: the array items, or the single decoded value.
    pub fn records(&self) -> &[Value] {
        match self.data() {
            Value::Array(items) => items,
            Value::Null => &[],
            other => std::slice::from_ref(other),
        }
    }

    /// Body decoded as plain JSON, without the timestamp hook.
    pub fn json(&self) -> TassResult<serde_json::Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Whether `Content-Disposition` announces an attachment or inline file.
    pub fn has_file_stream(&self) -> bool {
        self.header_str(CONTENT_DISPOSITION)
            .map(|cd| {
                let cd = cd.to_ascii_lowercase();
                cd.contains("attachment") || cd.contains("inline")
            })
            .unwrap_or(false)
    }

    /// Remote file name from `Content-Disposition`, if present and well formed.
    pub fn filename(&self) -> Option<String> {
        parse_content_disposition_filename(self.header_str(CONTENT_DISPOSITION)?)
    }

    /// Digest algorithm and hex value from the `Digest` header.
    pub fn digest_data(&self) -> Option<DigestData> {
        let header = self.header_str("digest")?;
        let (algorithm, encoded) = header.split_once('=')?;
        match BASE64.decode(encoded.trim()) {
            Ok(raw) => Some(DigestData {
                algorithm: algorithm.trim().to_string(),
                hex: hex::encode(raw),
            }),
            Err(e) => {
                warn!("malformed digest header '{header}': {e}");
                None
            }
        }
    }

    /// Whether a paginated endpoint may have another page.
    ///
    /// True when the body is a JSON array exactly as long as the `$top` that
    /// was sent with the request.
    pub fn has_more(&self) -> bool {
        self.has_more_than(None)
    }

    /// Like [`ResponseEnvelope::has_more`] with an explicit page size.
    pub fn has_more_than(&self, expected: Option<usize>) -> bool {
        if !self.has_json() {
            return false;
        }
        let expected = expected.or_else(|| {
            self.requested_url
                .query_pairs()
                .find(|(k, _)| k == odata::TOP)
                .and_then(|(_, v)| v.parse().ok())
        });
        match (self.data(), expected) {
            (Value::Array(items), Some(expected)) => expected > 0 && items.len() == expected,
            _ => false,
        }
    }

    /// Whether `status` is OK for this call.
    pub fn is_safe(&self, status: u16) -> bool {
        constants::DEFAULT_OK_STATUS_RANGE.contains(&status) || self.safe_statuses.contains(&status)
    }

    /// Whether the response status is OK for this call.
    pub fn resp_ok(&self) -> bool {
        self.is_safe(self.status)
    }

    /// Fail with `HttpStatus` unless the status is OK for this call.
    pub fn raise_for_status(&self) -> TassResult<()> {
        if self.resp_ok() {
            return Ok(());
        }

        let status = StatusCode::from_u16(self.status).ok();
        let reason = status.and_then(|s| s.canonical_reason()).unwrap_or("");
        let kind = match self.status {
            400..=499 => "Client Error",
            500..=599 => "Server Error",
            _ => "Error",
        };
        let mut message = format!("{} {kind}: {reason} for url: {}", self.status, self.url);
        if let Some(detail) = self.error_detail() {
            message.push_str("\nAPI error data:\n");
            message.push_str(&detail);
        }

        Err(TassError::HttpStatus {
            status: self.status,
            url: self.url.to_string(),
            message,
        })
    }

    /// `title detail\nerrors\nmessage` from a JSON object body, if there is one.
    fn error_detail(&self) -> Option<String> {
        let body: serde_json::Value = serde_json::from_slice(&self.body).ok()?;
        let object = body.as_object().filter(|o| !o.is_empty())?;
        let [title, detail, errors, message] = ERROR_FIELDS.map(|field| match object.get(field) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => "None".to_string(),
            Some(other) => other.to_string(),
        });
        Some(format!("{title} {detail}\n{errors}\n{message}"))
    }
}

impl fmt::Debug for ResponseEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseEnvelope")
            .field("status", &self.status)
            .field("url", &self.url.as_str())
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Parse `filename` or RFC 5987 `filename*` out of a `Content-Disposition` value.
///
/// The plain form wins when both are present.
pub fn parse_content_disposition_filename(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for param in split_params(header).into_iter().skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        match key.trim().to_ascii_lowercase().as_str() {
            "filename" => plain = Some(value.to_string()),
            "filename*" => {
                let encoded = value.split_once("''").map_or(value, |(_, rest)| rest);
                extended = urlencoding::decode(encoded.trim_matches(|c| c == '"' || c == '\''))
                    .ok()
                    .map(|s| s.into_owned());
            }
            _ => {}
        }
    }

    plain.or(extended).filter(|name| !name.is_empty())
}

/// Split a header value on `;` outside double quotes.
fn split_params(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in header.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                parts.push(header[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(header[start..].trim());
    parts
}
