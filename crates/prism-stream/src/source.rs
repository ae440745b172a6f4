//! Pull-based byte sources.
//!
//! The whole pipeline is demand-driven: nothing is computed until the
//! consumer pulls, and at most one chunk is in flight at a time. An empty
//! chunk signals end of stream; it is not an error.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::StreamError;

/// A pull-based stream of byte chunks. Empty chunk = end of stream.
#[async_trait]
pub trait ByteSource: Send {
    /// Pull the next chunk. Returns an empty chunk at end of stream; every
    /// call after that must keep returning empty.
    async fn next_chunk(&mut self) -> Result<Bytes, StreamError>;

    /// Release underlying resources. Must be idempotent.
    async fn close(&mut self);
}

/// Source over an in-memory buffer, split into fixed-size chunks.
pub struct VecSource {
    data: Bytes,
    chunk_size: usize,
}

impl VecSource {
    /// Source yielding `data` in chunks of `chunk_size` bytes.
    pub fn new(data: impl Into<Bytes>, chunk_size: usize) -> Self {
        Self {
            data: data.into(),
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl ByteSource for VecSource {
    async fn next_chunk(&mut self) -> Result<Bytes, StreamError> {
        if self.data.is_empty() {
            return Ok(Bytes::new());
        }
        let n = self.chunk_size.min(self.data.len());
        Ok(self.data.split_to(n))
    }

    async fn close(&mut self) {
        self.data = Bytes::new();
    }
}

/// Source fed by a channel; used to bridge request bodies arriving from the
/// transport layer, and to simulate slow or failing sources in tests.
pub struct ChannelSource {
    rx: mpsc::Receiver<Result<Bytes, StreamError>>,
    done: bool,
}

impl ChannelSource {
    /// Source reading from `rx`. A closed channel signals end of stream.
    pub fn new(rx: mpsc::Receiver<Result<Bytes, StreamError>>) -> Self {
        Self { rx, done: false }
    }

    /// Build a source plus the sender feeding it.
    pub fn pair(buffer: usize) -> (mpsc::Sender<Result<Bytes, StreamError>>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self::new(rx))
    }
}

#[async_trait]
impl ByteSource for ChannelSource {
    async fn next_chunk(&mut self) -> Result<Bytes, StreamError> {
        if self.done {
            return Ok(Bytes::new());
        }
        match self.rx.recv().await {
            Some(Ok(chunk)) => {
                if chunk.is_empty() {
                    self.done = true;
                }
                Ok(chunk)
            }
            Some(Err(e)) => {
                self.done = true;
                Err(e)
            }
            None => {
                self.done = true;
                Ok(Bytes::new())
            }
        }
    }

    async fn close(&mut self) {
        self.done = true;
        self.rx.close();
    }
}
