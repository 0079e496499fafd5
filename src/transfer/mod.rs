//! Resilient single-file transfer engine.
//!
//! A transfer streams a remote resource into a temporary file next to its
//! destination, verifies it, and moves it into place. Failed attempts are
//! retried from the first byte with an optionally shrinking read buffer;
//! cancellation is polled as bytes arrive.
//!
//! # Features
//!
//! - Bounded retries for single reads and for whole attempts
//! - Diminishing read buffer across failed attempts
//! - Per-transfer and process-wide cancellation
//! - Size and MD5 verification, including checksums fetched from a URL
//! - Non-blocking progress events with a batch offset
//!
//! # Example
//!
//! ```no_run
//! use fetcher_core::transfer::{Downloader, TransferRequest};
//! use fetcher_core::TransferSettings;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::http(TransferSettings::default(), CancellationToken::new())?;
//! let request = TransferRequest::builder("https://example.com/paper.pdf", "./paper.pdf")
//!     .expected_checksum("5EB63BBBE01EEED093CB22BB8F5ACDC3")
//!     .build()?;
//! let outcome = downloader.download(request).await;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

mod cancel;
mod chunk;
pub mod constants;
mod engine;
mod error;
mod integrity;
mod progress;
mod request;
mod retry;
mod session;
mod transport;

pub use cancel::{CancelReason, CancellationGate};
pub use chunk::read_chunk;
pub use engine::{Downloader, TransferHandle, TransferOutcome};
pub use error::TransferError;
pub use integrity::{
    checksums_match, fetch_remote_checksum, md5_file_hex, remote_checksum, verify_checksum,
};
pub use progress::{ProgressReceiver, ProgressReporter};
pub use request::{TransferRequest, TransferRequestBuilder};
pub use retry::{finalize, next_buffer_size};
pub use session::TransferState;
pub use transport::{ByteStream, HttpTransport, Transport};
