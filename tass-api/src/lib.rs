//! TASS API - async HTTP client engine for the TASS school administration API.
//!
//! A [`Session`] holds the connection settings and bearer token and
//! re-authenticates before the token expires. [`Endpoint`] sends verb calls
//! under the tenant root, wraps every result in a [`ResponseEnvelope`] and
//! provides pagination, uploads and checksum-verified downloads on top.

pub mod download;
pub mod options;
pub mod pagination;
pub mod response;
pub mod session;
pub mod transport;
pub mod upload;
pub mod url;
pub mod worker;

// Re-export key types
pub use download::{DigestAlgorithm, DownloadOptions};
pub use options::{merge_filter_param, FileMap, FormPart, OptionValue, Params, Payload, RequestOptions};
pub use pagination::{Page, PageSource, PaginatedResult, PaginationConfig, Pager};
pub use response::{DigestData, ResponseEnvelope};
pub use session::{Session, TenantRecord, TokenData};
pub use transport::{HttpTransport, RetryConfig, Transport};
pub use upload::FileUpload;
pub use worker::{Endpoint, Verb};
