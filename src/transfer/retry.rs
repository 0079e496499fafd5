//! Attempt-level retry policy and finalisation.
//!
//! A transfer makes up to `max_retries + 1` attempts. Every failure is
//! retried the same way, whether the bytes never arrived or arrived and
//! failed verification: there is no byte-range resume, so each retry starts
//! from the first byte. With the diminishing buffer enabled the read size
//! shrinks after each failure, down to single bytes on the last attempt.

use std::path::Path;

use tracing::{debug, error, instrument, warn};

use super::TransferError;

/// Buffer size for the attempt after attempt `attempt` (0-based) failed.
///
/// Quarters `current`; forces 1 when the computed size would be 0 or when
/// the next attempt is the last one allowed by `max_retries`.
#[must_use]
pub fn next_buffer_size(current: usize, attempt: u32, max_retries: u32) -> usize {
    let quartered = current / 4;
    if max_retries.saturating_sub(attempt) <= 1 || quartered < 1 {
        1
    } else {
        quartered
    }
}

/// Moves the finished temporary file onto the destination path.
///
/// `rename` replaces an existing destination in one step where the platform
/// allows it. If it fails while a destination exists, the destination is
/// deleted and the rename tried once more.
///
/// # Errors
///
/// Returns [`TransferError::Io`] if the temporary file is missing, the old
/// destination cannot be removed, or the rename fails.
#[instrument(level = "debug", fields(temp = %temp.display(), destination = %destination.display()))]
pub async fn finalize(temp: &Path, destination: &Path) -> Result<(), TransferError> {
    if let Err(e) = tokio::fs::metadata(temp).await {
        error!(error = %e, "temporary file missing");
        return Err(TransferError::io(temp, e));
    }

    let first = match tokio::fs::rename(temp, destination).await {
        Ok(()) => {
            debug!("destination replaced");
            return Ok(());
        }
        Err(e) => e,
    };

    if tokio::fs::try_exists(destination).await.unwrap_or(false) {
        warn!(error = %first, "rename over existing destination failed, deleting it first");
        if let Err(e) = tokio::fs::remove_file(destination).await {
            error!(error = %e, "failed to delete existing destination");
            return Err(TransferError::io(destination, e));
        }
        if let Err(e) = tokio::fs::rename(temp, destination).await {
            error!(error = %e, "failed to rename temporary file");
            return Err(TransferError::io(destination, e));
        }
        return Ok(());
    }

    error!(error = %first, "failed to rename temporary file");
    Err(TransferError::io(destination, first))
}

/// Removes a leftover temporary file from an earlier run, if any.
///
/// # Errors
///
/// Returns [`TransferError::Io`] if the file exists but cannot be deleted.
pub async fn clear_stale_temp(temp: &Path) -> Result<(), TransferError> {
    match tokio::fs::remove_file(temp).await {
        Ok(()) => {
            debug!(path = %temp.display(), "removed stale temporary file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TransferError::io(temp, e)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // ==================== Buffer Policy Tests ====================

    #[test]
    fn test_next_buffer_quarters_when_attempts_remain() {
        // initial 4096, attempt 0 fails, 2 attempts remain
        assert_eq!(next_buffer_size(4096, 0, 2), 1024);
    }

    #[test]
    fn test_next_buffer_forced_to_one_before_last_attempt() {
        assert_eq!(next_buffer_size(1024, 1, 2), 1);
    }

    #[test]
    fn test_next_buffer_sequence() {
        let max_retries = 4;
        let mut size = 65_536;
        let mut seen = Vec::new();
        for attempt in 0..max_retries {
            size = next_buffer_size(size, attempt, max_retries);
            seen.push(size);
        }
        assert_eq!(seen, vec![16_384, 4_096, 1_024, 1]);
    }

    #[test]
    fn test_next_buffer_never_zero() {
        for current in 0..8 {
            assert_eq!(next_buffer_size(current, 0, 10), (current / 4).max(1));
        }
    }

    #[test]
    fn test_next_buffer_single_retry_goes_straight_to_one() {
        assert_eq!(next_buffer_size(4096, 0, 1), 1);
    }

    // ==================== Finalisation Tests ====================

    #[tokio::test]
    async fn test_finalize_moves_temp_into_place() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.bin.download");
        let dest = dir.path().join("a.bin");
        std::fs::write(&temp, b"new").unwrap();

        finalize(&temp, &dest).await.unwrap();

        assert!(!temp.exists());
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_finalize_replaces_existing_destination() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.bin.download");
        let dest = dir.path().join("a.bin");
        std::fs::write(&dest, b"old contents").unwrap();
        std::fs::write(&temp, b"new").unwrap();

        finalize(&temp, &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_finalize_fails_without_temp_file() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("missing.download");
        let dest = dir.path().join("missing");

        let result = finalize(&temp, &dest).await;
        assert!(matches!(result, Err(TransferError::Io { .. })));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_finalize_fails_when_destination_dir_missing() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("a.bin.download");
        let dest = dir.path().join("no-such-dir").join("a.bin");
        std::fs::write(&temp, b"new").unwrap();

        let result = finalize(&temp, &dest).await;
        assert!(result.is_err());
        assert!(temp.exists(), "temp file is left for the caller");
    }

    #[tokio::test]
    async fn test_clear_stale_temp_tolerates_absence() {
        let dir = TempDir::new().unwrap();
        clear_stale_temp(&dir.path().join("nothing.download"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clear_stale_temp_removes_file() {
        let dir = TempDir::new().unwrap();
        let temp = dir.path().join("old.download");
        std::fs::write(&temp, b"stale").unwrap();

        clear_stale_temp(&temp).await.unwrap();
        assert!(!temp.exists());
    }
}
