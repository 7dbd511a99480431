//! HTTP transport with retry and origin-aware redirect handling.
//!
//! Automatic redirects are disabled on the underlying client. Redirects are
//! followed here so that the `Authorization` header can be dropped on every
//! hop and restored only when the hop stays on the origin of the request that
//! was originally sent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Request, RequestBuilder, Response, StatusCode, Url};
use tracing::{debug, warn};

use tass_core::config::ServerConfig;
use tass_core::constants;
use tass_core::error::{TassError, TassResult};

use crate::url::same_origin;

/// Sends fully built requests. The seam between the session and the network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start building a request for this transport.
    fn request(&self, method: Method, url: Url) -> RequestBuilder;

    /// Send a request, following redirects and retrying as configured.
    async fn execute(&self, request: Request) -> TassResult<Response>;
}

/// Retry configuration for HTTP requests.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts.
    pub max_retries: u32,
    /// Base delay between retries (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// HTTP status codes that trigger a retry.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: constants::DEFAULT_RETRIES,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            retryable_statuses: constants::DEFAULT_STATUS_FORCELIST.to_vec(),
        }
    }
}

impl RetryConfig {
    /// Retry settings taken from the server configuration.
    pub fn from_server(config: &ServerConfig) -> Self {
        Self {
            max_retries: config.retries,
            retryable_statuses: config.status_forcelist.clone(),
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (zero-based), with exponential backoff.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let max_ms = self.max_delay.as_millis() as u64;
        Duration::from_millis(delay_ms.min(max_ms))
    }

    fn should_retry(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status.as_u16())
    }
}

/// Per-call redirect bookkeeping: where the call started and the credentials it carried.
///
/// Lives on the stack of one `execute` call and is dropped with it, so
/// concurrent calls never see each other's state.
#[derive(Debug)]
pub(crate) struct RedirectState {
    original_url: Url,
    original_auth: Option<HeaderValue>,
}

impl RedirectState {
    pub(crate) fn new(request: &Request) -> Self {
        Self {
            original_url: request.url().clone(),
            original_auth: request.headers().get(AUTHORIZATION).cloned(),
        }
    }

    /// Prepare the headers of the next hop towards `target`.
    ///
    /// The inherited `Authorization` is always removed. The original one is put
    /// back only when `target` shares the original origin.
    pub(crate) fn prepare_hop(&self, headers: &mut HeaderMap, target: &Url) {
        headers.remove(AUTHORIZATION);
        if let Some(auth) = &self.original_auth {
            if same_origin(&self.original_url, target) {
                headers.insert(AUTHORIZATION, auth.clone());
            }
        }
    }
}

/// Default transport backed by `reqwest`.
#[derive(Clone)]
pub struct HttpTransport {
    inner: Client,
    retry_config: RetryConfig,
    max_redirects: usize,
}

impl HttpTransport {
    /// Create a transport from server configuration.
    pub fn new(config: &ServerConfig) -> TassResult<Self> {
        let inner = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .connect_timeout(Duration::from_secs(15))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .redirect(Policy::none())
            .build()
            .map_err(|e| TassError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            inner,
            retry_config: RetryConfig::from_server(config),
            max_redirects: constants::MAX_REDIRECTS,
        })
    }

    /// Set custom retry configuration.
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Set the maximum number of redirect hops followed per call.
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    /// Send one request, retrying on configured statuses and transient errors.
    ///
    /// Requests whose body cannot be cloned are sent exactly once.
    async fn send_with_retry(&self, request: Request) -> TassResult<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        let mut request = request;
        let mut attempt: u32 = 0;

        loop {
            let retry_copy = if attempt < self.retry_config.max_retries {
                request.try_clone()
            } else {
                None
            };

            let outcome = self.inner.execute(request).await;
            let Some(next) = retry_copy else {
                return outcome.map_err(classify_error);
            };

            match outcome {
                Ok(response) if !self.retry_config.should_retry(response.status()) => {
                    return Ok(response)
                }
                Ok(response) => {
                    warn!("retryable status {} from {} {}", response.status().as_u16(), method, url);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!("retryable error on {} {}: {}", method, url, e);
                }
                Err(e) => return Err(classify_error(e)),
            }

            let delay = self.retry_config.delay_for(attempt);
            attempt += 1;
            warn!(
                "retrying {} {} (attempt {}/{}) after {:.1}s",
                method,
                url,
                attempt + 1,
                self.retry_config.max_retries + 1,
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
            request = next;
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.inner.request(method, url)
    }

    async fn execute(&self, request: Request) -> TassResult<Response> {
        let state = RedirectState::new(&request);
        let mut request = request;

        for hop in 0..=self.max_redirects {
            let replay = request.try_clone();
            let method = request.method().clone();
            let mut headers = request.headers().clone();

            let response = self.send_with_retry(request).await?;
            let status = response.status();

            let Some(target) = redirect_target(&response) else {
                return Ok(response);
            };
            if hop == self.max_redirects {
                break;
            }

            let next = match status {
                StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER
                    if method != Method::GET && method != Method::HEAD =>
                {
                    headers.remove(CONTENT_TYPE);
                    headers.remove(CONTENT_LENGTH);
                    Request::new(Method::GET, target)
                }
                _ => match replay {
                    Some(mut replay) => {
                        *replay.url_mut() = target;
                        replay
                    }
                    None => {
                        warn!("cannot replay streamed body to {target}, returning redirect response");
                        return Ok(response);
                    }
                },
            };

            let mut next = next;
            state.prepare_hop(&mut headers, next.url());
            *next.headers_mut() = headers;
            debug!("following {} redirect to {}", status.as_u16(), next.url());
            request = next;
        }

        Err(TassError::Http(format!(
            "exceeded {} redirects starting at {}",
            self.max_redirects, state.original_url
        )))
    }
}

/// The absolute target of a followable redirect response.
fn redirect_target(response: &Response) -> Option<Url> {
    if !matches!(
        response.status(),
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    ) {
        return None;
    }
    let location = response.headers().get(LOCATION)?.to_str().ok()?;
    response.url().join(location).ok()
}

/// Classify a reqwest error into a TassError variant.
pub(crate) fn classify_error(e: reqwest::Error) -> TassError {
    if e.is_timeout() {
        TassError::Timeout(e.to_string())
    } else if e.is_connect() {
        TassError::Http(format!("connection failed: {e}"))
    } else {
        TassError::Http(e.to_string())
    }
}
