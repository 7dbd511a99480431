//! Global error types for the TASS API client.
//!
//! All error categories across the client are unified into a single
//! `TassError` enum with conversions from underlying library errors.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Convenience type alias for Results using TassError.
pub type TassResult<T> = Result<T, TassError>;

/// Why a credential exchange was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// The authentication response body was not valid JSON.
    NotJson,
    /// The body was JSON but lacked a required token field, or a field was malformed.
    InvalidStructure(String),
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::NotJson => write!(f, "no authentication response"),
            AuthFailure::InvalidStructure(detail) => write!(f, "invalid token structure ({detail})"),
        }
    }
}

/// Unified error type covering all error categories in the client.
#[derive(Error, Debug)]
pub enum TassError {
    // -- Configuration errors --
    /// Failed to load or parse client configuration.
    #[error("configuration error: {0}")]
    Config(String),

    // -- Authentication errors --
    /// Credential exchange failed. Fatal to the attempted call, never retried.
    #[error("authentication failed: {kind}. HTTP {status} for {url}")]
    Authentication {
        /// HTTP status of the authentication response.
        status: u16,
        /// URL of the authentication endpoint.
        url: String,
        /// What was wrong with the response.
        kind: AuthFailure,
    },

    /// The configured company code is not among the companies the token allows.
    #[error("company code '{0}' is not permitted for this token")]
    TenantNotAllowed(String),

    // -- Network errors --
    /// HTTP transport failure (connection, TLS, protocol).
    #[error("http error: {0}")]
    Http(String),

    /// HTTP request timed out.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Server returned a status that is not considered safe for the call.
    #[error("{message}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// URL of the failed request.
        url: String,
        /// Full message including any API-supplied error detail.
        message: String,
    },

    /// A request could not be built from the supplied options.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // -- Data errors --
    /// A timestamp string matched none of the candidate formats.
    #[error("could not parse datetime '{input}' with either regex pattern match or datetime formats: {}", quote_all(.attempted))]
    DatetimeParse {
        /// The original input string.
        input: String,
        /// Every format that was attempted, in order.
        attempted: Vec<String>,
    },

    /// A JSON patch could not be applied.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// A payload is missing required attributes. Raised before any network call.
    #[error("validation error: {0}")]
    Validation(String),

    // -- File transfer errors --
    /// Downloaded content does not match the `Digest` response header.
    #[error("'{}' digest value '{actual}' does not match expected value '{expected}'", .path.display())]
    DigestMismatch {
        /// The downloaded file; it remains on disk.
        path: PathBuf,
        /// Digest announced by the server (hex).
        expected: String,
        /// Digest computed locally (hex).
        actual: String,
    },

    /// The `Digest` header names an algorithm the client cannot compute.
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigest(String),

    /// A download could not be completed.
    #[error("download error: {0}")]
    Download(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TassError {
    /// Whether this error came from the credential exchange.
    pub fn is_authentication(&self) -> bool {
        matches!(self, TassError::Authentication { .. })
    }

    /// The HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            TassError::Authentication { status, .. } | TassError::HttpStatus { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TassError {
    fn from(e: serde_json::Error) -> Self {
        TassError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for TassError {
    fn from(e: toml::de::Error) -> Self {
        TassError::Config(e.to_string())
    }
}

fn quote_all(items: &[String]) -> String {
    items
        .iter()
        .map(|s| format!("'{s}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = TassError::Config("bad value".to_string());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn test_authentication_error_carries_status_and_url() {
        let err = TassError::Authentication {
            status: 401,
            url: "https://api.example.com/users".into(),
            kind: AuthFailure::NotJson,
        };
        assert!(err.is_authentication());
        assert_eq!(err.status(), Some(401));
        assert_eq!(
            err.to_string(),
            "authentication failed: no authentication response. HTTP 401 for https://api.example.com/users"
        );
    }

    #[test]
    fn test_datetime_parse_lists_formats() {
        let err = TassError::DatetimeParse {
            input: "nope".into(),
            attempted: vec!["%Y-%m-%d".into(), "%Y-%m-%dT%H:%M:%S".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'nope'"));
        assert!(msg.ends_with("'%Y-%m-%d', '%Y-%m-%dT%H:%M:%S'"));
    }

    #[test]
    fn test_digest_mismatch_names_both_values() {
        let err = TassError::DigestMismatch {
            path: PathBuf::from("/tmp/report.pdf"),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("'bb'"));
        assert!(msg.contains("'aa'"));
    }
}
