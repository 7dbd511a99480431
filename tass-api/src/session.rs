//! Authenticated session.
//!
//! A `Session` owns the server configuration, the transport, the default
//! outgoing headers and the current token. Authentication is lazy: the
//! dispatcher calls [`Session::ensure_authenticated`] before every request and
//! a credential exchange happens only when there is no token or it is within
//! `token_expire_offset` seconds of expiring.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeDelta, TimeZone, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

use tass_core::config::ServerConfig;
use tass_core::constants::media;
use tass_core::datetime::ParsedDatetime;
use tass_core::error::{AuthFailure, TassError, TassResult};
use tass_core::platform::default_user_agent;

use crate::options::{FileMap, RequestOptions};
use crate::transport::{classify_error, HttpTransport, Transport};
use crate::upload::FileUploadContext;
use crate::url::urljoin;
use crate::worker::Verb;

/// One company the token is allowed to act for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub cmpy_code: String,
    /// Any other fields the server sends.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Result of a successful credential exchange.
#[derive(Clone)]
pub struct TokenData {
    pub token: String,
    pub expiry: DateTime<Utc>,
    pub allowed_companies: Vec<TenantRecord>,
}

impl fmt::Debug for TokenData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenData")
            .field("token", &"<redacted>")
            .field("expiry", &self.expiry)
            .field("allowed_companies", &self.allowed_companies)
            .finish()
    }
}

impl TokenData {
    /// Extract the token fields from an authentication response body.
    pub fn from_json(data: &serde_json::Value) -> Result<Self, AuthFailure> {
        let field = |name: &str| {
            data.get(name)
                .ok_or_else(|| AuthFailure::InvalidStructure(format!("missing '{name}'")))
        };

        let token = field("token")?
            .as_str()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthFailure::InvalidStructure("'token' is not a non-empty string".into()))?
            .to_string();

        let expiry = field("token_expiry_date")?
            .as_str()
            .ok_or_else(|| AuthFailure::InvalidStructure("'token_expiry_date' is not a string".into()))
            .and_then(parse_expiry)?;

        let allowed_companies = serde_json::from_value(field("allowed_companies")?.clone())
            .map_err(|e| AuthFailure::InvalidStructure(format!("'allowed_companies': {e}")))?;

        Ok(Self {
            token,
            expiry,
            allowed_companies,
        })
    }
}

/// Parse a token expiry: RFC 3339 when it carries an offset, otherwise local time.
fn parse_expiry(raw: &str) -> Result<DateTime<Utc>, AuthFailure> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    let parsed = ParsedDatetime::parse(raw)
        .map_err(|e| AuthFailure::InvalidStructure(format!("'token_expiry_date': {e}")))?;
    Local
        .from_local_datetime(&parsed.value())
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| AuthFailure::InvalidStructure(format!("'token_expiry_date' {raw} does not exist locally")))
}

/// Authenticated connection to one TASS API server.
pub struct Session {
    config: Arc<ServerConfig>,
    transport: Arc<dyn Transport>,
    headers: RwLock<HeaderMap>,
    token: RwLock<Option<TokenData>>,
    /// Serializes credential exchanges.
    auth_lock: Mutex<()>,
}

impl Session {
    /// Create a session with the default HTTP transport.
    pub fn new(config: ServerConfig) -> TassResult<Self> {
        let transport = HttpTransport::new(&config)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a session over a custom transport.
    pub fn with_transport(config: ServerConfig, transport: Arc<dyn Transport>) -> TassResult<Self> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(media::JSON));
        let user_agent = HeaderValue::from_str(&default_user_agent())
            .map_err(|e| TassError::Config(format!("invalid user agent: {e}")))?;
        headers.insert(USER_AGENT, user_agent);

        Ok(Self {
            config: Arc::new(config),
            transport,
            headers: RwLock::new(headers),
            token: RwLock::new(None),
            auth_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Headers sent with every request, including `Authorization` once authenticated.
    pub async fn default_headers(&self) -> HeaderMap {
        self.headers.read().await.clone()
    }

    /// Set or replace a default header.
    pub async fn set_default_header(&self, name: &str, value: &str) -> TassResult<()> {
        let (name, value) = header_pair(name, value)?;
        self.headers.write().await.insert(name, value);
        Ok(())
    }

    /// Exchange the client key and secret for a token.
    ///
    /// On success the bearer token is installed into the default headers and
    /// the token data replaces any previous one.
    pub async fn authenticate(&self) -> TassResult<()> {
        let url = urljoin(&self.config.base, &[self.config.auth_endpoint.as_str()])?;
        let url = Url::parse(&url).map_err(|e| TassError::InvalidRequest(e.to_string()))?;
        debug!("authenticating against {url}");

        let payload = serde_json::json!({
            "clientKey": self.config.key,
            "clientSecret": self.config.secret,
        });
        let request = self
            .transport
            .request(Method::POST, url)
            .headers(self.request_headers_without_auth().await)
            .json(&payload)
            .build()
            .map_err(|e| TassError::InvalidRequest(e.to_string()))?;

        let response = self.transport.execute(request).await?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.bytes().await.map_err(classify_error)?;

        let failure = |kind: AuthFailure| {
            error!("authentication failed: {kind}. HTTP {status} for {final_url}");
            TassError::Authentication {
                status,
                url: final_url.clone(),
                kind,
            }
        };

        let data: serde_json::Value =
            serde_json::from_slice(&body).map_err(|_| failure(AuthFailure::NotJson))?;
        let token = TokenData::from_json(&data).map_err(failure)?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", token.token))
            .map(|mut value| {
                value.set_sensitive(true);
                value
            })
            .map_err(|_| failure(AuthFailure::InvalidStructure("token is not a valid header value".into())))?;

        info!(
            "authenticated, token valid until {} for {} company(ies)",
            token.expiry,
            token.allowed_companies.len()
        );
        self.headers.write().await.insert(AUTHORIZATION, bearer);
        *self.token.write().await = Some(token);
        Ok(())
    }

    /// Authenticate unless a usable token is already held.
    ///
    /// Concurrent callers wait on one exchange instead of each starting their own.
    pub async fn ensure_authenticated(&self) -> TassResult<()> {
        if self.is_authenticated().await {
            return Ok(());
        }
        let _guard = self.auth_lock.lock().await;
        if self.is_authenticated().await {
            return Ok(());
        }
        self.authenticate().await
    }

    /// Whether a token is held and has not reached `expiry - token_expire_offset`.
    pub async fn is_authenticated(&self) -> bool {
        self.is_authenticated_at(Utc::now()).await
    }

    /// [`Session::is_authenticated`] evaluated at `now`.
    pub async fn is_authenticated_at(&self, now: DateTime<Utc>) -> bool {
        let token = self.token.read().await;
        match token.as_ref() {
            Some(token) => {
                let offset = TimeDelta::try_seconds(self.config.token_expire_offset).unwrap_or(TimeDelta::zero());
                token
                    .expiry
                    .checked_sub_signed(offset)
                    .is_some_and(|deadline| now <= deadline)
            }
            None => false,
        }
    }

    /// Whether the configured company code is among the allowed companies.
    pub async fn is_valid_tenant(&self) -> bool {
        self.token
            .read()
            .await
            .as_ref()
            .map(|t| t.allowed_companies.iter().any(|c| c.cmpy_code == self.config.cmpy_code))
            .unwrap_or(false)
    }

    /// Companies the current token may act for.
    pub async fn allowed_companies(&self) -> Vec<TenantRecord> {
        self.token
            .read()
            .await
            .as_ref()
            .map(|t| t.allowed_companies.clone())
            .unwrap_or_default()
    }

    /// A copy of the current token data.
    pub async fn token_data(&self) -> Option<TokenData> {
        self.token.read().await.clone()
    }

    /// Forget the current token.
    pub async fn clear_token(&self) {
        self.headers.write().await.remove(AUTHORIZATION);
        *self.token.write().await = None;
    }

    /// Split caller options into (transport options, domain options).
    pub fn build_request_parameters(&self, options: RequestOptions) -> (RequestOptions, RequestOptions) {
        options.split()
    }

    /// Adjust `Content-Type` in `options` for `verb`.
    ///
    /// Multipart requests drop it so the boundary can be set by the client.
    /// PATCH sends JSON Patch, POST and PUT send JSON, anything else gets JSON
    /// only if no type was given.
    pub fn set_content_type_header(&self, verb: Verb, options: &mut RequestOptions) {
        let has_files = options.contains("files");
        let headers = options.headers_mut();
        let existing: Vec<String> = headers
            .keys()
            .filter(|k| k.eq_ignore_ascii_case("content-type"))
            .cloned()
            .collect();

        let forced = match verb {
            _ if has_files => None,
            Verb::Patch => Some(media::JSON_PATCH),
            Verb::Post | Verb::Put => Some(media::JSON),
            Verb::Get | Verb::Delete if existing.is_empty() => Some(media::JSON),
            Verb::Get | Verb::Delete => return,
        };

        for key in existing {
            headers.remove(&key);
        }
        if let Some(content_type) = forced {
            headers.insert("Content-Type".to_string(), content_type.to_string());
        }
    }

    /// Open the files of a multipart upload. Handles close when the context drops.
    pub fn prepare_file_upload(&self, files: &FileMap) -> TassResult<FileUploadContext> {
        FileUploadContext::open(files)
    }

    /// Resource URL: base, company code, endpoint and path segments.
    pub fn build_url(&self, endpoint: Option<&str>, path: &[&str]) -> TassResult<Url> {
        let mut segments = Vec::with_capacity(path.len() + 2);
        segments.push(self.config.cmpy_code.as_str());
        segments.extend(endpoint);
        segments.extend_from_slice(path);
        let joined = urljoin(&self.config.base, &segments)?;
        Url::parse(&joined).map_err(|e| TassError::InvalidRequest(format!("invalid url '{joined}': {e}")))
    }

    async fn request_headers_without_auth(&self) -> HeaderMap {
        let mut headers = self.default_headers().await;
        headers.remove(AUTHORIZATION);
        headers
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("base", &self.config.base)
            .field("cmpy_code", &self.config.cmpy_code)
            .finish()
    }
}

/// Validate a header name and value pair.
pub(crate) fn header_pair(name: &str, value: &str) -> TassResult<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| TassError::InvalidRequest(format!("invalid header name '{name}': {e}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| TassError::InvalidRequest(format!("invalid value for header '{name}': {e}")))?;
    Ok((header_name, header_value))
}
