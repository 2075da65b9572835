//! Channel types for the push pipeline.
//!
//! Scheduler -> Sender -> per-connection writer task -> socket.
//! Using bounded channels for backpressure.

use crate::streaming::protocol::Chunk;
use tokio::sync::{mpsc, oneshot};

/// Channel size for Sender -> connection writer (chunks in flight per client)
pub const SINK_CHANNEL_SIZE: usize = 64;

/// Default data chunk size for transfer
pub const DATA_CHUNK_SIZE: usize = 500;

// =============================================================================
// ChunkSink: Sender -> connection writer
// =============================================================================

/// A chunk queued for one client stream.
///
/// `written`, when present, fires once the writer has put the frame on the
/// socket. Dropping it unfired tells the sender the write never happened.
#[derive(Debug)]
pub struct Outgoing {
    pub chunk: Chunk,
    written: Option<oneshot::Sender<()>>,
}

impl Outgoing {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            written: None,
        }
    }

    /// Queue `chunk` and get a handle that resolves when it was written.
    pub fn with_ack(chunk: Chunk) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                chunk,
                written: Some(tx),
            },
            rx,
        )
    }

    /// Signal that the chunk reached the wire and hand it back.
    pub fn mark_written(self) -> Chunk {
        if let Some(tx) = self.written {
            // Sender may have timed out and gone away
            let _ = tx.send(());
        }
        self.chunk
    }
}

/// Output handle for one client stream.
///
/// The connection's writer task owns the receiving side; once that task
/// exits (socket error or shutdown) every further send fails and every
/// queued acknowledgement is dropped.
pub type ChunkSink = mpsc::Sender<Outgoing>;

/// Receiving side of a [`ChunkSink`], drained by the connection writer
pub type ChunkSource = mpsc::Receiver<Outgoing>;

/// Create a bounded channel for Sender -> writer communication
pub fn chunk_channel() -> (ChunkSink, ChunkSource) {
    mpsc::channel(SINK_CHANNEL_SIZE)
}

// =============================================================================
// Transfer statistics
// =============================================================================

/// Statistics for one transfer, on either end of the stream
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    /// Payload bytes carried by Pending chunks
    pub bytes: u64,

    /// Pending chunks sent or received
    pub chunks: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_chunk(&mut self, len: usize) {
        self.bytes += len as u64;
        self.chunks += 1;
    }
}

/// Totals for a receive loop over the lifetime of one stream
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveStats {
    /// Completed transfers
    pub transfers: u64,

    /// Transfers whose payload failed to decode
    pub decode_failures: u64,

    /// Total payload bytes over all transfers
    pub bytes: u64,
}

// =============================================================================
// Tests
// =============================================================================
