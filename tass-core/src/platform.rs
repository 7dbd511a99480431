//! Platform detection and user agent construction.

use crate::constants::{CLIENT_NAME, CLIENT_VERSION};

/// Detected operating system platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Detect the current platform at compile time.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Get a human-readable platform name.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Linux => "Linux",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Build a user agent string of the form `name/version rust/os/arch`.
pub fn build_user_agent(name: &str, version: &str) -> String {
    format!(
        "{name}/{version} rust/{}/{}",
        Platform::current(),
        std::env::consts::ARCH
    )
}

/// The user agent sent with every request.
pub fn default_user_agent() -> String {
    build_user_agent(CLIENT_NAME, CLIENT_VERSION)
}
