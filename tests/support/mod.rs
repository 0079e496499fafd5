//! Scripted in-memory transport for engine tests.
//!
//! Each call to `open` consumes the next script; once the scripts run out
//! the last one is replayed. Readers record the buffer size of their first
//! read so tests can observe the diminishing buffer.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use fetcher_core::transfer::ByteStream;
use fetcher_core::{CancellationGate, TransferError, Transport};
use tokio::io::{AsyncRead, ReadBuf};
use url::Url;

/// One scripted reader action.
#[derive(Debug, Clone)]
pub enum Step {
    /// Deliver these bytes, split across reads as the caller's buffer allows.
    Data(Vec<u8>),
    /// Fail the next read once, then continue with the following step.
    Fail(io::ErrorKind),
    /// Fail every read from here on.
    FailForever(io::ErrorKind),
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// `payload(total)` split into `Data` steps of at most `chunk` bytes.
pub fn chunked(total: usize, chunk: usize) -> Vec<Step> {
    payload(total)
        .chunks(chunk)
        .map(|c| Step::Data(c.to_vec()))
        .collect()
}

#[derive(Default)]
struct Shared {
    opens: AtomicUsize,
    first_read_sizes: Mutex<Vec<usize>>,
}

pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    fallback: Vec<Step>,
    shared: Arc<Shared>,
    cancel_after: Option<(u64, CancellationGate)>,
}

impl ScriptedTransport {
    /// One script per `open`; the last script repeats afterwards.
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        let fallback = scripts.last().cloned().unwrap_or_default();
        Self {
            scripts: Mutex::new(scripts.into()),
            fallback,
            shared: Arc::new(Shared::default()),
            cancel_after: None,
        }
    }

    /// The same script for every `open`.
    pub fn repeating(script: Vec<Step>) -> Self {
        Self::new(vec![script])
    }

    /// Requests cancellation on `gate` once a reader has delivered `bytes`.
    pub fn cancel_after(mut self, bytes: u64, gate: CancellationGate) -> Self {
        self.cancel_after = Some((bytes, gate));
        self
    }

    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    pub fn first_read_sizes(&self) -> Vec<usize> {
        self.shared.first_read_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, _url: &Url) -> Result<ByteStream, TransferError> {
        self.shared.opens.fetch_add(1, Ordering::SeqCst);
        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Box::new(ScriptedReader {
            steps: steps.into(),
            shared: Arc::clone(&self.shared),
            first_read: true,
            delivered: 0,
            cancel_after: self.cancel_after.clone(),
        }))
    }

    async fn probe(&self, _url: &Url) -> bool {
        true
    }
}

struct ScriptedReader {
    steps: VecDeque<Step>,
    shared: Arc<Shared>,
    first_read: bool,
    delivered: u64,
    cancel_after: Option<(u64, CancellationGate)>,
}

impl AsyncRead for ScriptedReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.first_read {
            this.first_read = false;
            this.shared
                .first_read_sizes
                .lock()
                .unwrap()
                .push(buf.remaining());
        }

        loop {
            match this.steps.front_mut() {
                None => return Poll::Ready(Ok(())),
                Some(Step::Data(bytes)) if bytes.is_empty() => {
                    this.steps.pop_front();
                }
                Some(Step::Data(bytes)) => {
                    let n = bytes.len().min(buf.remaining());
                    buf.put_slice(&bytes[..n]);
                    *bytes = bytes.split_off(n);
                    if bytes.is_empty() {
                        this.steps.pop_front();
                    }
                    this.delivered += n as u64;
                    if let Some((limit, gate)) = &this.cancel_after
                        && this.delivered >= *limit
                    {
                        gate.request_cancel();
                    }
                    return Poll::Ready(Ok(()));
                }
                Some(Step::Fail(kind)) => {
                    let kind = *kind;
                    this.steps.pop_front();
                    return Poll::Ready(Err(io::Error::new(kind, "scripted failure")));
                }
                Some(Step::FailForever(kind)) => {
                    return Poll::Ready(Err(io::Error::new(*kind, "scripted failure")));
                }
            }
        }
    }
}
