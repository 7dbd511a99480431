//! URL composition and origin comparison.

use reqwest::Url;

use tass_core::error::{TassError, TassResult};

/// Characters stripped from both ends of each joined segment.
const SEGMENT_TRIM: &[char] = &['/', ' ', '\n', '\r', '\t'];

/// Append path segments to `base`, normalizing the result.
///
/// Each segment is trimmed of surrounding slashes and whitespace and
/// percent-encoded (inner `/` kept). Empty segments are skipped. The combined
/// path has `.` and `..` resolved, runs of `/` collapsed and no trailing `/`.
/// The query and fragment of `base` are kept.
pub fn urljoin<S: AsRef<str>>(base: &str, segments: &[S]) -> TassResult<String> {
    let mut url = Url::parse(base)
        .map_err(|e| TassError::InvalidRequest(format!("invalid base url '{base}': {e}")))?;

    let mut combined = url.path().to_string();
    for segment in segments.iter().map(AsRef::as_ref) {
        let segment = segment.trim_matches(SEGMENT_TRIM);
        if segment.is_empty() {
            continue;
        }
        combined.push('/');
        combined.push_str(&quote(segment));
    }

    url.set_path(&normalize_path(&combined));
    Ok(url.to_string())
}

/// Percent-encode a path, keeping `/`.
fn quote(segment: &str) -> String {
    segment
        .split('/')
        .map(|part| urlencoding::encode(part).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve `.`/`..`, collapse repeated `/` and drop any trailing `/`.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let mut out = String::with_capacity(path.len());
    for part in parts {
        out.push('/');
        out.push_str(part);
    }
    out
}

/// Scheme, host and effective port of a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
}

impl Origin {
    /// Default ports (80 for http, 443 for https) are filled in when absent.
    pub fn of(url: &Url) -> Self {
        Self {
            scheme: url.scheme().to_ascii_lowercase(),
            host: url.host_str().unwrap_or_default().to_ascii_lowercase(),
            port: url.port_or_known_default(),
        }
    }
}

/// Whether two URLs share scheme, host and port.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    Origin::of(a) == Origin::of(b)
}
