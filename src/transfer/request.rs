//! Immutable description of one transfer.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use url::Url;

use super::TransferError;
use super::constants::{
    DEFAULT_BUFFER_SIZE, DEFAULT_MAX_CHUNK_RETRIES, DEFAULT_MAX_RETRIES, TEMP_SUFFIX,
};
use crate::config::TransferSettings;

/// What to fetch, where to put it, and how hard to try.
///
/// Built once through [`TransferRequest::builder`]; the engine never mutates
/// it. Configuration errors (bad URL, unusable destination) are reported by
/// [`TransferRequestBuilder::build`] before any attempt runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    source: Url,
    destination: PathBuf,
    expected_size: u64,
    expected_checksum: Option<String>,
    max_retries: u32,
    max_chunk_retries: u32,
    buffer_size: usize,
    diminishing_buffer: bool,
    already_transferred: u64,
}

impl TransferRequest {
    /// Starts a builder for `source` saved to `destination`.
    pub fn builder(source: impl Into<String>, destination: impl Into<PathBuf>) -> TransferRequestBuilder {
        TransferRequestBuilder::new(source, destination)
    }

    /// Source address.
    #[must_use]
    pub fn source(&self) -> &Url {
        &self.source
    }

    /// User-visible destination path, written only after success.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Path of the file written during attempts: `<destination>.download`.
    #[must_use]
    pub fn temp_path(&self) -> PathBuf {
        temp_path_for(&self.destination)
    }

    /// Expected byte size, 0 when unknown.
    #[must_use]
    pub fn expected_size(&self) -> u64 {
        self.expected_size
    }

    /// Expected checksum, `None` when verification is skipped.
    #[must_use]
    pub fn expected_checksum(&self) -> Option<&str> {
        self.expected_checksum.as_deref()
    }

    /// Whole-transfer retries after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Attempts allowed for each chunk read.
    #[must_use]
    pub fn max_chunk_retries(&self) -> u32 {
        self.max_chunk_retries
    }

    /// Read-buffer size for the first attempt.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Whether the buffer shrinks after each failed attempt.
    #[must_use]
    pub fn diminishing_buffer(&self) -> bool {
        self.diminishing_buffer
    }

    /// Bytes already transferred by earlier files of a batch, added to progress events.
    #[must_use]
    pub fn already_transferred(&self) -> u64 {
        self.already_transferred
    }
}

/// Builder for [`TransferRequest`].
#[derive(Debug, Clone)]
pub struct TransferRequestBuilder {
    source: String,
    destination: PathBuf,
    expected_size: u64,
    expected_checksum: Option<String>,
    max_retries: u32,
    max_chunk_retries: u32,
    buffer_size: usize,
    diminishing_buffer: bool,
    already_transferred: u64,
}

impl TransferRequestBuilder {
    fn new(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            expected_size: 0,
            expected_checksum: None,
            max_retries: DEFAULT_MAX_RETRIES,
            max_chunk_retries: DEFAULT_MAX_CHUNK_RETRIES,
            buffer_size: DEFAULT_BUFFER_SIZE,
            diminishing_buffer: true,
            already_transferred: 0,
        }
    }

    /// Sets the expected size in bytes (0 disables the size check).
    #[must_use]
    pub fn expected_size(mut self, bytes: u64) -> Self {
        self.expected_size = bytes;
        self
    }

    /// Sets the expected checksum. Blank values disable verification.
    #[must_use]
    pub fn expected_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.expected_checksum = Some(checksum.into());
        self
    }

    /// Sets the number of whole-transfer retries.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the number of attempts per chunk read.
    #[must_use]
    pub fn max_chunk_retries(mut self, retries: u32) -> Self {
        self.max_chunk_retries = retries;
        self
    }

    /// Sets the initial buffer size. 0 falls back to the default.
    #[must_use]
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Enables or disables the diminishing buffer.
    #[must_use]
    pub fn diminishing_buffer(mut self, enabled: bool) -> Self {
        self.diminishing_buffer = enabled;
        self
    }

    /// Copies the retry and buffer tuning from `settings`.
    #[must_use]
    pub fn with_settings(mut self, settings: &TransferSettings) -> Self {
        self.max_retries = settings.max_retries;
        self.max_chunk_retries = settings.max_chunk_retries;
        self.buffer_size = settings.buffer_size;
        self.diminishing_buffer = settings.diminishing_buffer;
        self
    }

    /// Sets the aggregate progress offset.
    #[must_use]
    pub fn already_transferred(mut self, bytes: u64) -> Self {
        self.already_transferred = bytes;
        self
    }

    /// Validates and builds the request.
    ///
    /// # Errors
    ///
    /// - [`TransferError::InvalidUrl`] if the source is blank, unparsable, or
    ///   not http(s).
    /// - [`TransferError::MissingDestination`] if the destination has no file
    ///   name component.
    pub fn build(self) -> Result<TransferRequest, TransferError> {
        let raw = self.source.trim();
        let source = Url::parse(raw).map_err(|_| TransferError::invalid_url(raw))?;
        if !matches!(source.scheme(), "http" | "https") {
            return Err(TransferError::invalid_url(raw));
        }

        if self.destination.file_name().is_none() {
            return Err(TransferError::missing_destination(self.destination));
        }

        let expected_checksum = self
            .expected_checksum
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        let buffer_size = if self.buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            self.buffer_size
        };

        Ok(TransferRequest {
            source,
            destination: self.destination,
            expected_size: self.expected_size,
            expected_checksum,
            max_retries: self.max_retries,
            max_chunk_retries: self.max_chunk_retries,
            buffer_size,
            diminishing_buffer: self.diminishing_buffer,
            already_transferred: self.already_transferred,
        })
    }
}

/// Derives the in-flight file path from a destination path.
fn temp_path_for(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map_or_else(OsString::new, std::ffi::OsStr::to_os_string);
    name.push(TEMP_SUFFIX);
    destination.with_file_name(name)
}
