//! Sender for push transfers.
//!
//! Reads a source blob in fixed-size blocks and emits one Pending chunk per
//! block, then exactly one Completed chunk. A transfer counts as sent only
//! once the connection writer has put the Completed chunk on the socket.

use crate::error::{PushError, Result};
use crate::streaming::channel::{ChunkSink, Outgoing, TransferStats, DATA_CHUNK_SIZE};
use crate::streaming::protocol::{Chunk, MAX_CHUNK_SIZE};
use bytes::Bytes;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, info};

/// Sender configuration
#[derive(Debug, Clone, Copy)]
pub struct SenderConfig {
    /// Bytes per Pending chunk
    pub chunk_size: usize,
}

impl SenderConfig {
    /// Chunks must be non-empty and fit in one frame with their header.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PushError::Config("chunk size must be greater than zero".into()));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(PushError::Config(format!(
                "chunk size {} exceeds maximum {}",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        Ok(())
    }
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DATA_CHUNK_SIZE,
        }
    }
}

/// Sender state
#[derive(Debug, Clone)]
pub struct Sender {
    config: SenderConfig,
}

impl Sender {
    pub fn new(config: SenderConfig) -> Self {
        Self { config }
    }

    /// Open `path` and push its content to `sink`.
    pub async fn send_file(
        &self,
        client_id: &str,
        sink: &ChunkSink,
        path: &Path,
    ) -> Result<TransferStats> {
        let file = File::open(path).await?;
        self.send(client_id, sink, BufReader::new(file)).await
    }

    /// Push everything readable from `source` to `sink`.
    ///
    /// Aborts on the first failed send without emitting a Completed chunk.
    /// Source read errors abort the same way and surface as `Io`. Returns
    /// after the writer confirms the Completed chunk was written; a writer
    /// that exits first fails the transfer with `SendFailure`.
    pub async fn send<R>(
        &self,
        client_id: &str,
        sink: &ChunkSink,
        mut source: R,
    ) -> Result<TransferStats>
    where
        R: AsyncRead + Unpin,
    {
        let mut stats = TransferStats::new();
        let mut buf = vec![0u8; self.config.chunk_size.max(1)];

        loop {
            let n = read_block(&mut source, &mut buf).await?;
            if n == 0 {
                break;
            }

            let chunk = Chunk::pending(Bytes::copy_from_slice(&buf[..n]));
            deliver(client_id, sink, Outgoing::new(chunk)).await?;
            stats.record_chunk(n);
            debug!(client_id, bytes = n, "sent chunk");
        }

        let (completed, written) = Outgoing::with_ack(Chunk::completed());
        deliver(client_id, sink, completed).await?;
        written.await.map_err(|_| PushError::SendFailure {
            client_id: client_id.to_string(),
            reason: "client stream closed before the transfer was written".into(),
        })?;
        info!(
            client_id,
            bytes = stats.bytes,
            chunks = stats.chunks,
            "send complete"
        );

        Ok(stats)
    }
}

async fn deliver(client_id: &str, sink: &ChunkSink, item: Outgoing) -> Result<()> {
    sink.send(item).await.map_err(|_| PushError::SendFailure {
        client_id: client_id.to_string(),
        reason: "client stream closed".into(),
    })
}

/// Fill `buf` from `source`, stopping early only at end of input.
async fn read_block<R>(source: &mut R, buf: &mut [u8]) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
