//! TASS API Core - Foundation types shared by the client.
//!
//! This crate provides:
//! - Client configuration (server URL, credentials, retry settings)
//! - Global error types covering all error categories
//! - Structured logging with tracing
//! - The precision-preserving datetime codec
//! - A JSON value model with first-class timestamps
//! - Structural diffing into JSON Patch documents

pub mod config;
pub mod constants;
pub mod datetime;
pub mod error;
pub mod json;
pub mod logging;
pub mod patch;
pub mod platform;
pub mod validation;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, LoggingConfig, ServerConfig};
pub use datetime::{ParseMethod, ParsedDatetime};
pub use error::{AuthFailure, TassError, TassResult};
pub use json::{Map, Value};
pub use logging::init_logging;
pub use patch::{OpKind, PatchOp, TrackedDict};
pub use platform::Platform;
