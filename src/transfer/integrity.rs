//! Post-transfer integrity checks.
//!
//! Local verification hashes a file with MD5 and renders the digest as
//! uppercase hex; comparisons against caller-supplied checksums ignore case.
//! Remote checksums are small text resources fetched with their own retry
//! loop, independent of the resource they will later validate.

use std::path::Path;

use md5::{Digest, Md5};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, instrument, warn};
use url::Url;

use super::TransferError;
use super::chunk::read_chunk;
use super::constants::{
    DEFAULT_MAX_CHUNK_RETRIES, DEFAULT_MAX_RETRIES, HASH_BLOCK_SIZE, MAX_CHECKSUM_BODY,
};
use super::transport::Transport;

/// Computes the MD5 of a local file as an uppercase hex string.
///
/// The file is streamed in fixed-size blocks, so memory use is constant.
///
/// # Errors
///
/// Returns [`TransferError::Io`] if the file cannot be opened or read.
#[instrument(level = "debug", fields(path = %path.display()))]
pub async fn md5_file_hex(path: &Path) -> Result<String, TransferError> {
    let mut file = File::open(path)
        .await
        .map_err(|e| TransferError::io(path, e))?;
    let mut hasher = Md5::new();
    let mut block = [0u8; HASH_BLOCK_SIZE];
    loop {
        let n = file
            .read(&mut block)
            .await
            .map_err(|e| TransferError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&block[..n]);
    }
    Ok(hex::encode_upper(hasher.finalize()))
}

/// Compares two checksums ignoring ASCII case and surrounding whitespace.
#[must_use]
pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// Hashes `path` and checks it against `expected`.
///
/// # Errors
///
/// Returns [`TransferError::ChecksumMismatch`] on a mismatch, or
/// [`TransferError::Io`] if the file cannot be hashed.
pub async fn verify_checksum(path: &Path, expected: &str) -> Result<(), TransferError> {
    let actual = md5_file_hex(path).await?;
    if checksums_match(expected, &actual) {
        Ok(())
    } else {
        Err(TransferError::checksum_mismatch(path, expected, actual))
    }
}

/// Fetches a remote checksum, retrying the whole fetch on failure.
///
/// Up to `max_attempts` fetches are made (at least one). A fetch fails when
/// the connection fails, the body cannot be read, or the body holds no
/// checksum. The first whitespace-separated token is returned in uppercase,
/// so `md5sum`-style `<hash>  <file>` lines work too.
///
/// # Errors
///
/// Returns the last fetch error once every attempt has failed.
#[instrument(skip(transport), fields(url = %url))]
pub async fn fetch_remote_checksum(
    transport: &dyn Transport,
    url: &Url,
    max_attempts: u32,
) -> Result<String, TransferError> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match fetch_checksum_once(transport, url).await {
            Ok(checksum) => {
                debug!(checksum = %checksum, attempt, "read remote checksum");
                return Ok(checksum);
            }
            Err(e) if attempt < max_attempts => {
                warn!(attempt, max_attempts, error = %e, "checksum fetch failed, retrying");
                attempt += 1;
            }
            Err(e) => {
                error!(attempt, error = %e, "checksum fetch failed");
                return Err(e);
            }
        }
    }
}

/// Probes `url` and, if it answers, fetches its checksum with the default retry count.
///
/// Returns `None` when the address is unreachable or never yields a checksum.
pub async fn remote_checksum(transport: &dyn Transport, url: &Url) -> Option<String> {
    if !transport.probe(url).await {
        warn!(url = %url, "checksum address not accessible");
        return None;
    }
    fetch_remote_checksum(transport, url, DEFAULT_MAX_RETRIES + 1)
        .await
        .ok()
}

async fn fetch_checksum_once(transport: &dyn Transport, url: &Url) -> Result<String, TransferError> {
    let mut stream = transport.open(url).await?;
    let mut body = Vec::new();
    let mut chunk = vec![0u8; HASH_BLOCK_SIZE];

    while body.len() < MAX_CHECKSUM_BODY {
        let want = chunk.len().min(MAX_CHECKSUM_BODY - body.len());
        let read = read_chunk(&mut stream, &mut chunk, want, 0, 0, DEFAULT_MAX_CHUNK_RETRIES)
            .await
            .map_err(|e| TransferError::stream(url.as_str(), e))?;
        let Some(n) = read else { break };
        body.extend_from_slice(&chunk[..n]);
    }

    parse_checksum(&String::from_utf8_lossy(&body))
        .ok_or_else(|| TransferError::empty_checksum(url.as_str()))
}

/// Extracts the checksum token from a checksum file body.
fn parse_checksum(body: &str) -> Option<String> {
    body.split_whitespace()
        .next()
        .map(str::to_uppercase)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file_with(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn test_md5_known_value_uppercase() {
        let file = temp_file_with(b"hello world");
        let hash = md5_file_hex(file.path()).await.unwrap();
        assert_eq!(hash, "5EB63BBBE01EEED093CB22BB8F5ACDC3");
    }

    #[tokio::test]
    async fn test_md5_empty_file() {
        let file = temp_file_with(b"");
        let hash = md5_file_hex(file.path()).await.unwrap();
        assert_eq!(hash, "D41D8CD98F00B204E9800998ECF8427E");
    }

    #[tokio::test]
    async fn test_md5_spans_multiple_blocks() {
        let content = vec![0xA5u8; HASH_BLOCK_SIZE * 3 + 17];
        let file = temp_file_with(&content);

        let mut hasher = Md5::new();
        hasher.update(&content);
        let expected = hex::encode_upper(hasher.finalize());

        assert_eq!(md5_file_hex(file.path()).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_md5_is_stable_across_runs() {
        let file = temp_file_with(b"the same bytes every time");
        let first = md5_file_hex(file.path()).await.unwrap();
        let second = md5_file_hex(file.path()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_md5_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = md5_file_hex(&dir.path().join("absent.bin")).await;
        assert!(matches!(result, Err(TransferError::Io { .. })));
    }

    #[test]
    fn test_checksums_match_ignores_case() {
        assert!(checksums_match("ABCD1234", "abcd1234"));
        assert!(checksums_match("abcd1234", "ABCD1234"));
        assert!(checksums_match(" abcd1234\n", "ABCD1234"));
        assert!(!checksums_match("ABCD1234", "ABCD1235"));
    }

    #[tokio::test]
    async fn test_verify_checksum_accepts_lowercase_expectation() {
        let file = temp_file_with(b"hello world");
        verify_checksum(file.path(), "5eb63bbbe01eeed093cb22bb8f5acdc3")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_checksum_reports_mismatch() {
        let file = temp_file_with(b"hello world");
        let err = verify_checksum(file.path(), "00000000000000000000000000000000")
            .await
            .unwrap_err();
        assert!(err.is_verification());
    }

    #[test]
    fn test_parse_checksum_trims_and_uppercases() {
        assert_eq!(parse_checksum("  abc123 \n"), Some("ABC123".to_string()));
    }

    #[test]
    fn test_parse_checksum_md5sum_format() {
        assert_eq!(
            parse_checksum("d41d8cd98f00b204e9800998ecf8427e  empty.txt\n"),
            Some("D41D8CD98F00B204E9800998ECF8427E".to_string())
        );
    }

    #[test]
    fn test_parse_checksum_blank_is_none() {
        assert_eq!(parse_checksum(" \n\t"), None);
        assert_eq!(parse_checksum(""), None);
    }
}
