//! Transfer engine: the attempt loop and its public handles.
//!
//! A [`Downloader`] owns a transport, the tuning settings, and the shutdown
//! token shared by everything it starts. Each call to [`Downloader::run`] or
//! [`Downloader::start`] is one top-level transfer: up to `max_retries + 1`
//! sequential attempts, then exactly one [`TransferOutcome`].
//!
//! # Example
//!
//! ```no_run
//! use fetcher_core::{Downloader, TransferRequest, TransferSettings};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::http(TransferSettings::default(), CancellationToken::new())?;
//! let request = TransferRequest::builder("https://example.com/data.zip", "./data.zip")
//!     .expected_size(1_048_576)
//!     .build()?;
//!
//! let mut handle = downloader.start(request);
//! while let Some(bytes) = handle.progress().recv().await {
//!     println!("{bytes} bytes");
//! }
//! println!("{:?}", handle.join().await);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use super::TransferError;
use super::cancel::{CancelReason, CancellationGate};
use super::integrity::remote_checksum;
use super::progress::{ProgressReceiver, ProgressReporter};
use super::request::TransferRequest;
use super::retry::{clear_stale_temp, finalize, next_buffer_size};
use super::session::{AttemptOutcome, TransferSession, TransferState};
use super::transport::{HttpTransport, Transport};
use crate::config::TransferSettings;

/// Terminal result of one top-level transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransferOutcome {
    /// The file was fetched, verified, and moved to its destination.
    Success,
    /// The transfer gave up. `attempts` is 0 when it failed before any attempt ran.
    Failed {
        /// Attempts made.
        attempts: u32,
    },
    /// A cancellation poll tripped; no further attempts were made.
    Cancelled {
        /// Which token tripped.
        reason: CancelReason,
    },
}

impl TransferOutcome {
    /// True only for [`TransferOutcome::Success`].
    #[must_use]
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    /// True for either kind of cancellation.
    #[must_use]
    pub fn is_cancelled(self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Runs transfers against one transport.
///
/// Cheap to clone; clones share the transport and the shutdown token.
#[derive(Clone)]
pub struct Downloader {
    transport: Arc<dyn Transport>,
    settings: TransferSettings,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("settings", &self.settings)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Downloader {
    /// Creates a downloader over an arbitrary transport.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: TransferSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            settings,
            shutdown,
        }
    }

    /// Creates a downloader over HTTP(S) using the timeouts in `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Client`] if the HTTP client cannot be built.
    pub fn http(settings: TransferSettings, shutdown: CancellationToken) -> Result<Self, TransferError> {
        let transport = HttpTransport::with_timeouts(
            Duration::from_secs(settings.connect_timeout_secs),
            Duration::from_secs(settings.read_timeout_secs),
        )?;
        Ok(Self::new(Arc::new(transport), settings, shutdown))
    }

    /// Tuning in effect for every transfer.
    #[must_use]
    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Creates a gate for one transfer, tied to this downloader's shutdown token.
    #[must_use]
    pub fn gate(&self) -> CancellationGate {
        CancellationGate::new(self.shutdown.clone())
    }

    /// Probes `url` and fetches the checksum it holds.
    ///
    /// Returns `None` if the address is not accessible or never yields a checksum.
    pub async fn remote_checksum(&self, url: &Url) -> Option<String> {
        remote_checksum(self.transport.as_ref(), url).await
    }

    /// Runs the transfer on the current task without progress events.
    ///
    /// Only the shutdown token can stop it early.
    pub async fn download(&self, request: TransferRequest) -> TransferOutcome {
        self.run(&request, &self.gate(), &ProgressReporter::disabled())
            .await
    }

    /// Spawns the transfer on the tokio runtime and returns its handle.
    #[must_use]
    pub fn start(&self, request: TransferRequest) -> TransferHandle {
        let gate = self.gate();
        let (progress, progress_rx) = ProgressReporter::channel();
        let running = Arc::new(AtomicBool::new(true));

        let downloader = self.clone();
        let task_gate = gate.clone();
        let task_running = Arc::clone(&running);
        let task = tokio::spawn(async move {
            let _running = RunningGuard(task_running);
            downloader.run(&request, &task_gate, &progress).await
        });

        TransferHandle {
            gate,
            running,
            progress: progress_rx,
            task,
        }
    }

    /// Runs the transfer to completion on the current task.
    ///
    /// Attempts run strictly one after another. Failures are retried until
    /// `max_retries` is used up; cancellation ends the transfer at once. On
    /// success the temporary file replaces the destination; a failed
    /// replacement is reported as [`TransferOutcome::Failed`]. On failure or
    /// cancellation the temporary file is left for the caller.
    #[instrument(skip_all, fields(url = %request.source(), destination = %request.destination().display()))]
    pub async fn run(
        &self,
        request: &TransferRequest,
        gate: &CancellationGate,
        progress: &ProgressReporter,
    ) -> TransferOutcome {
        let temp = request.temp_path();
        if let Err(e) = clear_stale_temp(&temp).await {
            error!(error = %e, "cannot clear previous temporary file");
            return TransferOutcome::Failed { attempts: 0 };
        }

        let session = TransferSession::new(
            request,
            &self.settings,
            self.transport.as_ref(),
            gate,
            progress,
        );
        let max_retries = request.max_retries();
        let mut state = TransferState::new(request.buffer_size());

        for attempt in 0..=max_retries {
            match session.attempt(&mut state, attempt).await {
                AttemptOutcome::Completed => {
                    return match finalize(&temp, request.destination()).await {
                        Ok(()) => {
                            info!(bytes = state.bytes_read(), attempts = attempt + 1, "transfer complete");
                            TransferOutcome::Success
                        }
                        Err(e) => {
                            error!(error = %e, "transfer finished but could not be moved into place");
                            TransferOutcome::Failed {
                                attempts: attempt + 1,
                            }
                        }
                    };
                }
                AttemptOutcome::Cancelled(reason) => {
                    info!(?reason, bytes = state.bytes_read(), "transfer cancelled");
                    return TransferOutcome::Cancelled { reason };
                }
                AttemptOutcome::Failed(e) if attempt < max_retries => {
                    warn!(attempt, max_retries, error = %e, "attempt failed, trying again");
                    if request.diminishing_buffer() {
                        let next = next_buffer_size(state.buffer_size(), attempt, max_retries);
                        debug!(from = state.buffer_size(), to = next, "shrinking read buffer");
                        state.set_buffer_size(next);
                    }
                }
                AttemptOutcome::Failed(e) => {
                    error!(attempts = attempt + 1, error = %e, "transfer failed");
                }
            }
        }

        TransferOutcome::Failed {
            attempts: max_retries + 1,
        }
    }
}

/// Handle to a transfer started with [`Downloader::start`].
#[derive(Debug)]
pub struct TransferHandle {
    gate: CancellationGate,
    running: Arc<AtomicBool>,
    progress: ProgressReceiver,
    task: JoinHandle<TransferOutcome>,
}

impl TransferHandle {
    /// Asks this transfer to stop at its next cancellation poll.
    pub fn request_cancel(&self) {
        self.gate.request_cancel();
    }

    /// True until the transfer has produced its outcome.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Progress events; the stream ends when the transfer finishes.
    pub fn progress(&mut self) -> &mut ProgressReceiver {
        &mut self.progress
    }

    /// Waits for the outcome.
    ///
    /// A transfer task that panicked or was aborted reports
    /// [`TransferOutcome::Failed`] with zero attempts.
    pub async fn join(self) -> TransferOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "transfer task did not complete");
                TransferOutcome::Failed { attempts: 0 }
            }
        }
    }
}

/// Clears the in-progress flag when the transfer task ends, however it ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
