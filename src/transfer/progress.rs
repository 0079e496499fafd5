//! Progress events emitted while a transfer streams.

use tokio::sync::mpsc;

/// Receiving end of a progress stream.
///
/// Each value is the running byte total, including the caller-supplied
/// offset for bytes already transferred in earlier files of a batch. The
/// stream closes when the transfer finishes.
pub type ProgressReceiver = mpsc::UnboundedReceiver<u64>;

/// Sending side used by a session. Never blocks the transfer.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::UnboundedSender<u64>>,
}

impl ProgressReporter {
    /// Creates a connected reporter/receiver pair.
    #[must_use]
    pub fn channel() -> (Self, ProgressReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Publishes a running total. A closed receiver is ignored.
    pub fn report(&self, total_bytes: u64) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(total_bytes);
        }
    }
}
