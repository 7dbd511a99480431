//! Client-wide constants.

/// Client name used in the user agent.
pub const CLIENT_NAME: &str = "com.github.redtrinity.tassapi";

/// Client version.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default authentication endpoint, relative to the API base.
pub const DEFAULT_AUTH_ENDPOINT: &str = "users";

/// Default token expiry safety offset in seconds.
pub const DEFAULT_TOKEN_EXPIRE_OFFSET_SECS: i64 = 60;

/// Default number of transport retries.
pub const DEFAULT_RETRIES: u32 = 5;

/// Status codes retried by the transport unless configured otherwise.
pub const DEFAULT_STATUS_FORCELIST: &[u16] = &[429];

/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Maximum number of redirect hops followed for one request.
pub const MAX_REDIRECTS: usize = 10;

/// Download write buffer size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Media types.
pub mod media {
    pub const JSON: &str = "application/json";
    pub const JSON_PATCH: &str = "application/json-patch+json";
    pub const OCTET_STREAM: &str = "application/octet-stream";
}

/// OData query parameter names.
pub mod odata {
    pub const TOP: &str = "$top";
    pub const SKIP: &str = "$skip";
    pub const FILTER: &str = "$filter";

    /// Records requested per page.
    pub const PAGE_SIZE: usize = 100;
    /// Skip increment applied after each page.
    pub const PAGE_OFFSET: usize = 100;
    /// Initial skip.
    pub const INITIAL_SKIP: usize = 0;
}

/// Default OK status range (inclusive start, exclusive end).
pub const DEFAULT_OK_STATUS_RANGE: std::ops::Range<u16> = 200..400;
