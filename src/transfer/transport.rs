//! Byte-stream transports.
//!
//! The engine only needs two things from the network: open a source as an
//! [`AsyncRead`] and probe whether an address answers. [`Transport`] is the
//! seam; [`HttpTransport`] is the reqwest-backed implementation used outside
//! tests.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, TryStreamExt};
use reqwest::{Client, StatusCode};
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::{debug, instrument, warn};
use url::Url;

use super::TransferError;
use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};

/// An opened source stream.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Opens byte streams for the transfer engine.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens `url` for reading from its first byte.
    ///
    /// # Errors
    ///
    /// Returns a [`TransferError`] if the connection fails or the source
    /// does not answer with a readable body.
    async fn open(&self, url: &Url) -> Result<ByteStream, TransferError>;

    /// Returns true when `url` answers a HEAD request with 200 OK.
    async fn probe(&self, url: &Url) -> bool;
}

/// HTTP(S) transport with independent connect and read timeouts.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with the default timeouts (2s connect, 5s read).
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Client`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, TransferError> {
        Self::with_timeouts(
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
            Duration::from_secs(READ_TIMEOUT_SECS),
        )
    }

    /// Creates a transport with explicit timeouts.
    ///
    /// The read timeout bounds each wait for body bytes, not the whole transfer.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Client`] if the HTTP client cannot be built.
    pub fn with_timeouts(connect: Duration, read: Duration) -> Result<Self, TransferError> {
        let client = Client::builder()
            .connect_timeout(connect)
            .read_timeout(read)
            .gzip(true)
            .user_agent(concat!("fetcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| TransferError::Client { source })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    async fn open(&self, url: &Url) -> Result<ByteStream, TransferError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| TransferError::network(url.as_str(), e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(TransferError::http_status(url.as_str(), status.as_u16()));
        }
        let declared = response.content_length();
        debug!(content_length = ?declared, "stream opened");

        let body = Box::pin(response.bytes_stream().map_err(body_error_to_io));
        Ok(Box::new(StreamReader::new(BodyStream::new(body, declared))))
    }

    #[instrument(level = "debug", skip(self), fields(url = %url))]
    async fn probe(&self, url: &Url) -> bool {
        match self.client.head(url.clone()).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                warn!(error = %e, "failed to reach address");
                false
            }
        }
    }
}

/// Maps body errors onto I/O kinds the chunk reader understands.
///
/// Only an error caused by an I/O `UnexpectedEof` keeps that kind. A dropped
/// connection becomes [`io::ErrorKind::ConnectionReset`] so it goes through
/// the chunk and attempt retries instead of the truncation drain.
fn body_error_to_io(error: reqwest::Error) -> io::Error {
    let kind = if error.is_timeout() {
        io::ErrorKind::TimedOut
    } else if error.is_decode() {
        io::ErrorKind::InvalidData
    } else if caused_by_eof(&error) {
        io::ErrorKind::UnexpectedEof
    } else {
        io::ErrorKind::ConnectionReset
    };
    io::Error::new(kind, error)
}

fn caused_by_eof(error: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        if cause
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::UnexpectedEof)
        {
            return true;
        }
        source = std::error::Error::source(cause);
    }
    false
}

/// Response body that stays failed once it has failed.
///
/// A read re-issued after a body error would otherwise find the exhausted
/// stream and take it for a clean end of body. A body that ends short of its
/// declared length is reported as [`io::ErrorKind::ConnectionAborted`].
struct BodyStream<S> {
    inner: S,
    declared: Option<u64>,
    delivered: u64,
    failed: Option<io::ErrorKind>,
}

impl<S> BodyStream<S> {
    fn new(inner: S, declared: Option<u64>) -> Self {
        Self {
            inner,
            declared,
            delivered: 0,
            failed: None,
        }
    }
}

impl<S, B> Stream for BodyStream<S>
where
    S: Stream<Item = io::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    type Item = io::Result<B>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(kind) = self.failed {
            return Poll::Ready(Some(Err(io::Error::new(kind, "response body already failed"))));
        }

        let item = ready!(Pin::new(&mut self.inner).poll_next(cx));
        match &item {
            Some(Ok(chunk)) => self.delivered += chunk.as_ref().len() as u64,
            Some(Err(e)) => self.failed = Some(e.kind()),
            None => {
                let delivered = self.delivered;
                if let Some(declared) = self.declared.filter(|d| delivered < *d) {
                    self.failed = Some(io::ErrorKind::ConnectionAborted);
                    return Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        format!("body ended after {delivered} of {declared} bytes"),
                    ))));
                }
            }
        }
        Poll::Ready(item)
    }
}
