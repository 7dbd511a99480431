//! Download integrity checks.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use md5::Md5;
use sha2::{Digest, Sha256, Sha384, Sha512};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use tass_core::constants::DEFAULT_CHUNK_SIZE;
use tass_core::error::{TassError, TassResult};

/// Hash algorithms accepted in a `Digest` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha256,
    Sha384,
    Sha512,
    Md5,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha-256",
            DigestAlgorithm::Sha384 => "sha-384",
            DigestAlgorithm::Sha512 => "sha-512",
            DigestAlgorithm::Md5 => "md5",
        }
    }

    fn hasher(&self) -> Box<dyn sha2::digest::DynDigest + Send> {
        match self {
            DigestAlgorithm::Sha256 => Box::new(Sha256::new()),
            DigestAlgorithm::Sha384 => Box::new(Sha384::new()),
            DigestAlgorithm::Sha512 => Box::new(Sha512::new()),
            DigestAlgorithm::Md5 => Box::new(Md5::new()),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = TassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha384" => Ok(DigestAlgorithm::Sha384),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            "md5" => Ok(DigestAlgorithm::Md5),
            _ => Err(TassError::UnsupportedDigest(s.to_string())),
        }
    }
}

/// Options for [`crate::worker::Endpoint::download`].
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Target directory. Defaults to the configured attachment directory.
    pub dest: Option<PathBuf>,
    /// File name override. Defaults to the name in `Content-Disposition`.
    pub out_fn: Option<String>,
    /// Write buffer size.
    pub chunk_size: usize,
    /// Verify the `Digest` header after writing.
    pub validate_checksum: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            dest: None,
            out_fn: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            validate_checksum: true,
        }
    }
}

/// Hex digest of the file at `path`, read `chunk_size` bytes at a time.
pub async fn file_digest(path: &Path, algorithm: DigestAlgorithm, chunk_size: usize) -> TassResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = algorithm.hasher();
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Check the file at `path` against an expected hex digest.
pub async fn verify_digest(
    path: &Path,
    algorithm: &str,
    expected_hex: &str,
    chunk_size: usize,
) -> TassResult<()> {
    let algorithm: DigestAlgorithm = algorithm.parse()?;
    let actual = file_digest(path, algorithm, chunk_size).await?;
    if actual.eq_ignore_ascii_case(expected_hex) {
        debug!("{} digest verified for {}", algorithm, path.display());
        Ok(())
    } else {
        warn!("{} digest mismatch for {}", algorithm, path.display());
        Err(TassError::DigestMismatch {
            path: path.to_path_buf(),
            expected: expected_hex.to_string(),
            actual,
        })
    }
}

/// Final path component of a server-supplied file name.
pub(crate) fn safe_file_name(name: &str) -> Option<String> {
    Path::new(name.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && n != "." && n != "..")
}
