//! Chunked push-transfer protocol.
//!
//! Server-initiated, unidirectional transfers over a long-lived connection.
//!
//! # Architecture
//!
//! ```text
//! +--------------+     +--------------+     +--------------+     +--------------+
//! |  Scheduler   | --> |    Sender    | --> |  conn writer | ==> |   Receiver   |
//! | (tick, pick) |     | (split blob) |     |   (socket)   |     | (reassemble) |
//! +--------------+     +--------------+     +--------------+     +--------------+
//! ```
//!
//! A transfer is any number of Pending chunks followed by exactly one
//! Completed chunk. The transport must deliver chunks in order.

pub mod channel;
pub mod protocol;
pub mod receiver;
pub mod sender;

pub use channel::{
    chunk_channel, ChunkSink, ChunkSource, Outgoing, ReceiveStats, TransferStats,
    DATA_CHUNK_SIZE, SINK_CHANNEL_SIZE,
};

pub use receiver::{CompletedTransfer, Receiver, SessionState, TransferSession};
pub use sender::{Sender, SenderConfig};

pub use protocol::{
    read_frame, write_frame, Chunk, Fatal, FatalCode, MessageType, Register, TransferStatus,
    MAX_CHUNK_SIZE, MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
