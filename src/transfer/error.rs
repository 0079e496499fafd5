//! Error types for the transfer module.
//!
//! Attempt-level failures are folded into a [`TransferOutcome`](super::TransferOutcome)
//! by the retry loop; these errors surface directly only from constructors
//! and from the standalone integrity helpers.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while transferring or verifying a file.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error fetching {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Connect or read timed out.
    #[error("timeout fetching {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The server answered with something other than 200 OK.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus {
        /// The URL that returned the status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Reading the response body failed after chunk-level retries.
    #[error("stream error reading {url}: {source}")]
    Stream {
        /// The URL being read.
        url: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Local filesystem error (create, write, flush, rename, delete).
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided source address is malformed or empty.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// No usable destination path was provided.
    #[error("no valid destination path specified: {path}")]
    MissingDestination {
        /// The rejected path.
        path: PathBuf,
    },

    /// The number of bytes read does not match the expected size.
    #[error("size check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}")]
    SizeMismatch {
        /// File that failed verification.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Bytes actually read.
        actual_bytes: u64,
    },

    /// The content hash does not match the expected checksum.
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// File that failed verification.
        path: PathBuf,
        /// Expected checksum as supplied by the caller.
        expected: String,
        /// Computed checksum (uppercase hex).
        actual: String,
    },

    /// A remote checksum resource returned no usable content.
    #[error("checksum resource {url} was empty")]
    EmptyChecksum {
        /// The checksum URL.
        url: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    Client {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl TransferError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::timeout(url);
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a body stream error.
    pub fn stream(url: impl Into<String>, source: std::io::Error) -> Self {
        Self::Stream {
            url: url.into(),
            source,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a missing destination error.
    pub fn missing_destination(path: impl Into<PathBuf>) -> Self {
        Self::MissingDestination { path: path.into() }
    }

    /// Creates a size mismatch error.
    pub fn size_mismatch(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::SizeMismatch {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a checksum mismatch error.
    pub fn checksum_mismatch(
        path: impl Into<PathBuf>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::ChecksumMismatch {
            path: path.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates an empty checksum error.
    pub fn empty_checksum(url: impl Into<String>) -> Self {
        Self::EmptyChecksum { url: url.into() }
    }

    /// Returns true when the bytes arrived but failed a post-transfer check.
    #[must_use]
    pub fn is_verification(&self) -> bool {
        matches!(self, Self::SizeMismatch { .. } | Self::ChecksumMismatch { .. })
    }
}

// No From<reqwest::Error>/From<std::io::Error>: every variant needs the URL
// or path the source error lacks.
