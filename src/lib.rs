//! Fetcher Core Library
//!
//! Resilient file transfers: stream a remote resource to disk through a
//! temporary file, retry failed reads and failed attempts, honour
//! cancellation, and verify size and MD5 before the file is moved into place.
//!
//! # Architecture
//!
//! - [`transfer`] - Transfer engine (requests, attempts, retry, verification)
//! - [`config`] - TOML file configuration for engine tuning

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod transfer;

// Re-export commonly used types
pub use config::{ConfigError, TransferSettings, load_default_settings, load_settings};
pub use transfer::{
    CancelReason, CancellationGate, Downloader, HttpTransport, ProgressReceiver,
    ProgressReporter, TransferError, TransferHandle, TransferOutcome, TransferRequest,
    TransferRequestBuilder, Transport,
};
