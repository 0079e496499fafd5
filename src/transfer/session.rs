//! A single transfer attempt: connect, stream, flush, verify.

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};

use super::TransferError;
use super::cancel::{CancelReason, CancellationGate};
use super::chunk::read_chunk;
use super::integrity::verify_checksum;
use super::progress::ProgressReporter;
use super::request::TransferRequest;
use super::transport::{ByteStream, Transport};
use crate::config::TransferSettings;

/// Mutable bookkeeping owned by one transfer for its whole lifetime.
///
/// `buffer_size` only changes between attempts; the byte counters restart at
/// zero when an attempt begins because every attempt re-downloads from the
/// first byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferState {
    buffer_size: usize,
    bytes_read: u64,
    since_flush: u64,
    since_progress: u64,
}

impl TransferState {
    /// Creates state for a transfer starting with `buffer_size`.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            bytes_read: 0,
            since_flush: 0,
            since_progress: 0,
        }
    }

    /// Read-buffer size the next attempt will use.
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Bytes read by the current (or last) attempt.
    #[must_use]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub(crate) fn set_buffer_size(&mut self, size: usize) {
        self.buffer_size = size.max(1);
    }

    fn begin_attempt(&mut self) {
        self.bytes_read = 0;
        self.since_flush = 0;
        self.since_progress = 0;
    }

    fn record(&mut self, n: usize) {
        let n = n as u64;
        self.bytes_read += n;
        self.since_flush += n;
        self.since_progress += n;
    }
}

/// How one attempt ended.
#[derive(Debug)]
pub(crate) enum AttemptOutcome {
    /// Every byte arrived and verification (if requested) passed.
    Completed,
    /// Something went wrong; the caller may retry.
    Failed(TransferError),
    /// A cancellation poll tripped; terminal.
    Cancelled(CancelReason),
}

enum StreamStop {
    Cancelled(CancelReason),
    Failed(TransferError),
}

/// Runs attempts for one request against one transport.
pub(crate) struct TransferSession<'a> {
    request: &'a TransferRequest,
    settings: &'a TransferSettings,
    transport: &'a dyn Transport,
    gate: &'a CancellationGate,
    progress: &'a ProgressReporter,
}

impl<'a> TransferSession<'a> {
    pub(crate) fn new(
        request: &'a TransferRequest,
        settings: &'a TransferSettings,
        transport: &'a dyn Transport,
        gate: &'a CancellationGate,
        progress: &'a ProgressReporter,
    ) -> Self {
        Self {
            request,
            settings,
            transport,
            gate,
            progress,
        }
    }

    /// Performs attempt number `attempt` (0-based) into the temporary file.
    #[instrument(
        level = "debug",
        skip(self, state),
        fields(url = %self.request.source(), buffer_size = state.buffer_size())
    )]
    pub(crate) async fn attempt(&self, state: &mut TransferState, attempt: u32) -> AttemptOutcome {
        state.begin_attempt();
        let temp = self.request.temp_path();

        let mut reader = match self.transport.open(self.request.source()).await {
            Ok(reader) => reader,
            Err(e) => return AttemptOutcome::Failed(e),
        };
        let file = match File::create(&temp).await {
            Ok(file) => file,
            Err(e) => return AttemptOutcome::Failed(TransferError::io(&temp, e)),
        };
        let mut sink = BufWriter::new(file);

        let streamed = self.stream(&mut reader, &mut sink, state, &temp).await;

        // Release both ends no matter how the loop exited.
        let closed = close_sink(&mut sink, &temp).await;
        drop(sink);
        drop(reader);

        match streamed {
            Err(StreamStop::Cancelled(reason)) => {
                debug!(bytes = state.bytes_read(), ?reason, "attempt cancelled");
                return AttemptOutcome::Cancelled(reason);
            }
            Err(StreamStop::Failed(e)) => return AttemptOutcome::Failed(e),
            Ok(()) => {}
        }
        if let Err(e) = closed {
            return AttemptOutcome::Failed(e);
        }

        match self.verify(&temp, state.bytes_read()).await {
            Ok(()) => {
                debug!(bytes = state.bytes_read(), "attempt completed");
                AttemptOutcome::Completed
            }
            Err(e) => AttemptOutcome::Failed(e),
        }
    }

    async fn stream(
        &self,
        reader: &mut ByteStream,
        sink: &mut BufWriter<File>,
        state: &mut TransferState,
        temp: &Path,
    ) -> Result<(), StreamStop> {
        let url = self.request.source().as_str();
        let expected = self.request.expected_size();
        let mut buffer = vec![0u8; state.buffer_size()];

        loop {
            let read = read_chunk(
                reader,
                &mut buffer,
                state.buffer_size(),
                state.bytes_read(),
                expected,
                self.request.max_chunk_retries(),
            )
            .await
            .map_err(|e| StreamStop::Failed(TransferError::stream(url, e)))?;
            let Some(n) = read else {
                return Ok(());
            };

            sink.write_all(&buffer[..n])
                .await
                .map_err(|e| StreamStop::Failed(TransferError::io(temp, e)))?;
            state.record(n);

            if state.since_flush >= self.settings.flush_threshold {
                state.since_flush = 0;
                sink.flush()
                    .await
                    .map_err(|e| StreamStop::Failed(TransferError::io(temp, e)))?;
            }

            if state.since_progress >= self.settings.progress_threshold {
                state.since_progress = 0;
                self.progress
                    .report(self.request.already_transferred() + state.bytes_read());
            }

            if state.bytes_read() >= self.settings.cancel_check_threshold
                && let Some(reason) = self.gate.check()
            {
                return Err(StreamStop::Cancelled(reason));
            }
        }
    }

    async fn verify(&self, temp: &Path, bytes_read: u64) -> Result<(), TransferError> {
        if let Some(expected) = self.request.expected_checksum() {
            verify_checksum(temp, expected).await?;
        }
        let expected_size = self.request.expected_size();
        if expected_size > 0 && expected_size != bytes_read {
            return Err(TransferError::size_mismatch(temp, expected_size, bytes_read));
        }
        Ok(())
    }
}

/// Flushes and shuts down the sink, attempting both even if the first fails.
async fn close_sink<W>(sink: &mut W, path: &Path) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    let flushed = sink.flush().await;
    if let Err(e) = &flushed {
        warn!(path = %path.display(), error = %e, "failed to flush output");
    }
    let shut = sink.shutdown().await;
    if let Err(e) = &shut {
        warn!(path = %path.display(), error = %e, "failed to close output");
    }
    flushed
        .and(shut)
        .map_err(|e| TransferError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_starts_empty() {
        let state = TransferState::new(4096);
        assert_eq!(state.buffer_size(), 4096);
        assert_eq!(state.bytes_read(), 0);
    }

    #[test]
    fn test_state_never_holds_zero_buffer() {
        let mut state = TransferState::new(0);
        assert_eq!(state.buffer_size(), 1);
        state.set_buffer_size(0);
        assert_eq!(state.buffer_size(), 1);
    }

    #[test]
    fn test_state_record_accumulates_all_counters() {
        let mut state = TransferState::new(16);
        state.record(10);
        state.record(5);
        assert_eq!(state.bytes_read(), 15);
        assert_eq!(state.since_flush, 15);
        assert_eq!(state.since_progress, 15);
    }

    #[test]
    fn test_begin_attempt_resets_counters_but_keeps_buffer() {
        let mut state = TransferState::new(16);
        state.record(10);
        state.set_buffer_size(4);
        state.begin_attempt();
        assert_eq!(state.bytes_read(), 0);
        assert_eq!(state.since_flush, 0);
        assert_eq!(state.since_progress, 0);
        assert_eq!(state.buffer_size(), 4);
    }
}
