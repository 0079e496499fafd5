//! Constants for the transfer module (thresholds, defaults, timeouts).

/// Bytes written to the sink between explicit flushes (5 KiB).
pub const FLUSH_THRESHOLD: u64 = 5 * 1024;

/// Bytes read between progress events (4 MiB).
pub const PROGRESS_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Total bytes an attempt must read before cancellation is polled (64 KiB).
pub const CANCEL_CHECK_THRESHOLD: u64 = 64 * 1024;

/// Default number of whole-transfer retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default number of attempts for a single chunk read.
pub const DEFAULT_MAX_CHUNK_RETRIES: u32 = 5;

/// Default read-buffer size for the first attempt (5 MiB).
pub const DEFAULT_BUFFER_SIZE: usize = 5 * 1024 * 1024;

/// Default HTTP connect timeout (2 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 2;

/// Default HTTP read timeout (5 seconds between received bytes).
pub const READ_TIMEOUT_SECS: u64 = 5;

/// Block size used when hashing local files.
pub const HASH_BLOCK_SIZE: usize = 1024;

/// Upper bound on the body of a remote checksum resource.
pub const MAX_CHECKSUM_BODY: usize = 64 * 1024;

/// Suffix appended to the destination file name while a transfer is in flight.
pub const TEMP_SUFFIX: &str = ".download";
