//! Cooperative cancellation for in-flight transfers.
//!
//! A [`CancellationGate`] combines the shutdown token shared by every
//! transfer a [`Downloader`](super::Downloader) starts with a token private to
//! one transfer. Sessions poll the gate at byte thresholds; nothing here
//! preempts a read that is already blocked.

use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Why a transfer stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The caller asked this specific transfer to stop.
    UserRequested,
    /// The shared shutdown token was triggered.
    Shutdown,
}

impl CancelReason {
    /// Returns true when the cancellation was requested for this transfer only.
    #[must_use]
    pub fn is_user_requested(self) -> bool {
        matches!(self, Self::UserRequested)
    }
}

/// Poll point combining a shared shutdown token and a per-transfer cancel token.
///
/// Clones share both tokens, so a clone kept by a [`TransferHandle`](super::TransferHandle)
/// cancels the transfer it was created for and nothing else.
#[derive(Debug, Clone)]
pub struct CancellationGate {
    shutdown: CancellationToken,
    user: CancellationToken,
}

impl CancellationGate {
    /// Creates a gate observing `shutdown` with a fresh per-transfer token.
    #[must_use]
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            shutdown,
            user: CancellationToken::new(),
        }
    }

    /// Requests cancellation of this transfer. Idempotent.
    pub fn request_cancel(&self) {
        self.user.cancel();
    }

    /// Returns true once [`request_cancel`](Self::request_cancel) was called.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.user.is_cancelled()
    }

    /// Returns true once the shared shutdown token was triggered.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Polls both tokens. Shutdown wins when both are set.
    #[must_use]
    pub fn check(&self) -> Option<CancelReason> {
        if self.is_shutdown_requested() {
            Some(CancelReason::Shutdown)
        } else if self.is_cancel_requested() {
            Some(CancelReason::UserRequested)
        } else {
            None
        }
    }
}
