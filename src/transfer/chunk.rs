//! Bounded chunk reads with per-chunk retry.
//!
//! [`read_chunk`] is the only place the engine touches the source stream.
//! It clamps each read to the bytes still expected, retries transient I/O
//! errors against the same stream, and salvages whatever it can one byte at
//! a time when the stream reports a truncated body.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

/// Reads up to `requested` bytes from `reader` into `buffer`.
///
/// Returns `Ok(Some(n))` with `n > 0` for data, or `Ok(None)` once the stream
/// is exhausted (including when `expected_total` bytes have already been
/// consumed).
///
/// * `requested` is capped at `buffer.len()`.
/// * When `expected_total > 0` the read is clamped to
///   `expected_total - consumed`, so a known-length resource is never
///   over-read.
/// * [`io::ErrorKind::UnexpectedEof`] switches to a byte-at-a-time drain and
///   returns the bytes recovered that way. A drain that recovers nothing
///   before failing returns that failure.
/// * Any other error re-issues the identical read up to `max_attempts - 1`
///   more times before it is returned. The stream is neither reset nor
///   reopened between tries.
///
/// # Errors
///
/// Returns the last I/O error once the attempts are used up, or the error
/// that stopped a byte drain before any byte was recovered.
pub async fn read_chunk<R>(
    reader: &mut R,
    buffer: &mut [u8],
    requested: usize,
    consumed: u64,
    expected_total: u64,
    max_attempts: u32,
) -> io::Result<Option<usize>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let len = clamp_request(requested.min(buffer.len()), consumed, expected_total);
    let window = &mut buffer[..len];
    let mut attempt: u32 = 1;

    loop {
        match reader.read(window).await {
            Ok(0) => return Ok(None),
            Ok(n) => return Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!(error = %e, "truncated stream, draining byte by byte");
                let recovered = drain_bytewise(reader, window).await?;
                return Ok((recovered > 0).then_some(recovered));
            }
            Err(e) => {
                if attempt >= max_attempts {
                    return Err(e);
                }
                debug!(attempt, max_attempts, error = %e, "chunk read failed, retrying");
                attempt += 1;
            }
        }
    }
}

/// Shrinks a read request so it stops exactly at the expected total.
fn clamp_request(requested: usize, consumed: u64, expected_total: u64) -> usize {
    if expected_total == 0 {
        return requested;
    }
    let remaining = expected_total.saturating_sub(consumed);
    usize::try_from(remaining).map_or(requested, |remaining| requested.min(remaining))
}

/// Reads single bytes into `window` until the stream ends, errors, or the
/// window is full. Returns the number of bytes recovered.
///
/// An error after some bytes were recovered is left for the next read to
/// report; an error before the first byte is returned.
async fn drain_bytewise<R>(reader: &mut R, window: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < window.len() {
        match reader.read(&mut window[filled..=filled]).await {
            Ok(0) => break,
            Ok(_) => filled += 1,
            Err(e) if filled == 0 => return Err(e),
            Err(e) => {
                trace!(filled, error = %e, "byte drain stopped");
                break;
            }
        }
    }
    Ok(filled)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio_test::io::Builder;

    fn reset() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")
    }

    #[tokio::test]
    async fn test_read_chunk_returns_bytes_read() {
        let mut reader = Cursor::new(b"hello world".to_vec());
        let mut buf = [0u8; 64];

        let n = read_chunk(&mut reader, &mut buf, 64, 0, 0, 1).await.unwrap();
        assert_eq!(n, Some(11));
        assert_eq!(&buf[..11], b"hello world");
    }

    #[tokio::test]
    async fn test_read_chunk_signals_end_of_stream() {
        let mut reader = Cursor::new(Vec::new());
        let mut buf = [0u8; 16];

        let n = read_chunk(&mut reader, &mut buf, 16, 0, 0, 1).await.unwrap();
        assert_eq!(n, None);
    }

    #[tokio::test]
    async fn test_read_chunk_caps_request_at_buffer_len() {
        let mut reader = Cursor::new(vec![7u8; 100]);
        let mut buf = [0u8; 10];

        let n = read_chunk(&mut reader, &mut buf, 4096, 0, 0, 1).await.unwrap();
        assert_eq!(n, Some(10));
    }

    #[tokio::test]
    async fn test_read_chunk_clamps_to_remaining_expected_bytes() {
        let mut reader = Cursor::new(vec![1u8; 10]);
        let mut buf = [0u8; 8];

        // 8 requested, only 6 expected in total
        let n = read_chunk(&mut reader, &mut buf, 8, 0, 6, 1).await.unwrap();
        assert_eq!(n, Some(6));

        // Budget exhausted: nothing more is read even though the stream has data
        let n = read_chunk(&mut reader, &mut buf, 8, 6, 6, 1).await.unwrap();
        assert_eq!(n, None);
        assert_eq!(reader.position(), 6);
    }

    #[tokio::test]
    async fn test_read_chunk_clamp_mid_stream() {
        let mut reader = Cursor::new(vec![1u8; 100]);
        let mut buf = [0u8; 32];

        let n = read_chunk(&mut reader, &mut buf, 32, 90, 100, 1)
            .await
            .unwrap();
        assert_eq!(n, Some(10));
    }

    #[tokio::test]
    async fn test_read_chunk_retries_transient_error() {
        let mut reader = Builder::new().read_error(reset()).read(b"hello").build();
        let mut buf = [0u8; 16];

        let n = read_chunk(&mut reader, &mut buf, 16, 0, 0, 2).await.unwrap();
        assert_eq!(n, Some(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[tokio::test]
    async fn test_read_chunk_propagates_after_attempts_exhausted() {
        let mut reader = Builder::new()
            .read_error(reset())
            .read_error(reset())
            .build();
        let mut buf = [0u8; 16];

        let err = read_chunk(&mut reader, &mut buf, 16, 0, 0, 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_read_chunk_single_attempt_does_not_retry() {
        let mut reader = Builder::new().read_error(reset()).build();
        let mut buf = [0u8; 16];

        let result = read_chunk(&mut reader, &mut buf, 16, 0, 0, 1).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_chunk_zero_attempts_behaves_like_one() {
        let mut reader = Builder::new().read_error(reset()).build();
        let mut buf = [0u8; 16];

        let result = read_chunk(&mut reader, &mut buf, 16, 0, 0, 0).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_read_chunk_truncated_stream_drains_bytewise() {
        let mut reader = Builder::new()
            .read(b"abc")
            .read_error(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated"))
            .read(b"d")
            .read(b"e")
            .build();
        let mut buf = [0u8; 16];

        let first = read_chunk(&mut reader, &mut buf, 16, 0, 0, 1).await.unwrap();
        assert_eq!(first, Some(3));

        let salvaged = read_chunk(&mut reader, &mut buf, 16, 3, 0, 1).await.unwrap();
        assert_eq!(salvaged, Some(2));
        assert_eq!(&buf[..2], b"de");

        let end = read_chunk(&mut reader, &mut buf, 16, 5, 0, 1).await.unwrap();
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn test_read_chunk_truncated_with_nothing_left_is_end_of_stream() {
        let mut reader = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated"))
            .build();
        let mut buf = [0u8; 16];

        let n = read_chunk(&mut reader, &mut buf, 16, 0, 0, 3).await.unwrap();
        assert_eq!(n, None);
    }

    #[tokio::test]
    async fn test_read_chunk_truncated_then_failing_stream_is_an_error() {
        let mut reader = Builder::new()
            .read_error(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated"))
            .read_error(reset())
            .build();
        let mut buf = [0u8; 16];

        let err = read_chunk(&mut reader, &mut buf, 16, 0, 0, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test]
    async fn test_read_chunk_drain_keeps_bytes_recovered_before_error() {
        let mut reader = Builder::new()
            .read(b"abc")
            .read_error(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated"))
            .read(b"d")
            .read_error(reset())
            .build();
        let mut buf = [0u8; 16];

        let first = read_chunk(&mut reader, &mut buf, 16, 0, 0, 1).await.unwrap();
        assert_eq!(first, Some(3));

        let salvaged = read_chunk(&mut reader, &mut buf, 16, 3, 0, 1).await.unwrap();
        assert_eq!(salvaged, Some(1));
        assert_eq!(buf[0], b'd');
    }

    #[test]
    fn test_clamp_request_unknown_size_passes_through() {
        assert_eq!(clamp_request(4096, 123_456, 0), 4096);
    }

    #[test]
    fn test_clamp_request_overshoot_is_zero() {
        assert_eq!(clamp_request(4096, 200, 100), 0);
    }
}
