//! Receiver for push transfers.
//!
//! Reassembles Pending chunks in arrival order and hands the payload off
//! when the Completed chunk arrives. One session per stream; the protocol
//! never interleaves two transfers on the same connection.

use crate::error::{PushError, Result};
use crate::streaming::channel::ReceiveStats;
use crate::streaming::protocol::{read_frame, Chunk, Fatal, MessageType, TransferStatus};
use bytes::{Bytes, BytesMut};
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accumulator state for the in-flight transfer on one stream
#[derive(Debug, Default)]
pub enum SessionState {
    /// No bytes accumulated
    #[default]
    Idle,
    /// At least one Pending chunk seen since the last completion
    Receiving {
        buffer: BytesMut,
        received_bytes: u64,
    },
}

/// A fully reassembled payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedTransfer {
    pub payload: Bytes,
    pub received_bytes: u64,
}

/// Per-connection transfer state machine.
#[derive(Debug, Default)]
pub struct TransferSession {
    state: SessionState,
}

impl TransferSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, SessionState::Idle)
    }

    pub fn received_bytes(&self) -> u64 {
        match &self.state {
            SessionState::Idle => 0,
            SessionState::Receiving { received_bytes, .. } => *received_bytes,
        }
    }

    /// Feed one chunk. Returns the payload when `chunk` completes a transfer,
    /// after which the session is back to `Idle`.
    pub fn on_chunk(&mut self, chunk: Chunk) -> Option<CompletedTransfer> {
        match chunk.status {
            TransferStatus::Pending => {
                if let SessionState::Idle = self.state {
                    self.state = SessionState::Receiving {
                        buffer: BytesMut::new(),
                        received_bytes: 0,
                    };
                }
                if let SessionState::Receiving {
                    buffer,
                    received_bytes,
                } = &mut self.state
                {
                    buffer.extend_from_slice(&chunk.content);
                    *received_bytes += chunk.content.len() as u64;
                }
                None
            }
            TransferStatus::Completed => match std::mem::take(&mut self.state) {
                SessionState::Idle => Some(CompletedTransfer {
                    payload: Bytes::new(),
                    received_bytes: 0,
                }),
                SessionState::Receiving {
                    buffer,
                    received_bytes,
                } => Some(CompletedTransfer {
                    payload: buffer.freeze(),
                    received_bytes,
                }),
            },
        }
    }
}

/// Receiver state
pub struct Receiver {
    client_id: String,
    session: TransferSession,
    stats: ReceiveStats,
}

impl Receiver {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            session: TransferSession::new(),
            stats: ReceiveStats::default(),
        }
    }

    /// Process frames until the stream ends, errors, or `shutdown` fires.
    ///
    /// `on_complete` runs after the session has been reset, so a failing
    /// handler never affects the next transfer; its errors are logged and
    /// counted. A clean end of stream returns `Ok`.
    pub async fn run<R, F>(
        &mut self,
        reader: &mut R,
        shutdown: &CancellationToken,
        mut on_complete: F,
    ) -> Result<ReceiveStats>
    where
        R: AsyncRead + Unpin,
        F: FnMut(CompletedTransfer) -> Result<()>,
    {
        loop {
            let frame = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(client_id = %self.client_id, "receiver shutting down");
                    return Ok(self.stats);
                }
                frame = read_frame(reader) => frame,
            };

            let (msg_type, payload) = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    if !self.session.is_idle() {
                        warn!(
                            client_id = %self.client_id,
                            received_bytes = self.session.received_bytes(),
                            "stream ended mid-transfer, discarding partial payload"
                        );
                    }
                    info!(client_id = %self.client_id, "stream closed by server");
                    return Ok(self.stats);
                }
                Err(e) => return Err(PushError::ReceiveFailure(e.to_string())),
            };

            match msg_type {
                MessageType::Chunk => {
                    let chunk = Chunk::decode(payload)?;
                    self.handle_chunk(chunk, &mut on_complete);
                }
                MessageType::Fatal => return Err(Fatal::decode(payload)?.into_error()),
                other => {
                    return Err(PushError::Protocol(format!(
                        "Unexpected message from server: {:?}",
                        other
                    )))
                }
            }
        }
    }

    fn handle_chunk<F>(&mut self, chunk: Chunk, on_complete: &mut F)
    where
        F: FnMut(CompletedTransfer) -> Result<()>,
    {
        if !chunk.is_completed() {
            if self.session.is_idle() {
                info!(client_id = %self.client_id, "receiving transfer");
            }
            debug!(client_id = %self.client_id, bytes = chunk.content.len(), "received chunk");
        }

        let Some(done) = self.session.on_chunk(chunk) else {
            return;
        };

        info!(
            client_id = %self.client_id,
            bytes = done.received_bytes,
            "receive complete"
        );
        self.stats.transfers += 1;
        self.stats.bytes += done.received_bytes;

        if let Err(e) = on_complete(done) {
            self.stats.decode_failures += 1;
            warn!(client_id = %self.client_id, error = %e, "failed to process transfer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(data: &'static [u8]) -> Chunk {
        Chunk::pending(Bytes::from_static(data))
    }

    #[test]
    fn test_session_accumulates_in_order() {
        let mut session = TransferSession::new();
        assert!(session.is_idle());

        assert!(session.on_chunk(pending(b"abc")).is_none());
        assert!(session.on_chunk(pending(b"def")).is_none());
        assert!(!session.is_idle());
        assert_eq!(session.received_bytes(), 6);

        let done = session.on_chunk(Chunk::completed()).unwrap();
        assert_eq!(done.payload, Bytes::from_static(b"abcdef"));
        assert_eq!(done.received_bytes, 6);
        assert!(session.is_idle());
        assert_eq!(session.received_bytes(), 0);
    }

    #[test]
    fn test_session_completed_while_idle_is_empty_transfer() {
        let mut session = TransferSession::new();
        let done = session.on_chunk(Chunk::completed()).unwrap();
        assert!(done.payload.is_empty());
        assert_eq!(done.received_bytes, 0);
        assert!(session.is_idle());
    }

    #[test]
    fn test_session_back_to_back_no_contamination() {
        let mut session = TransferSession::new();

        session.on_chunk(pending(b"first"));
        let first = session.on_chunk(Chunk::completed()).unwrap();

        session.on_chunk(pending(b"second"));
        let second = session.on_chunk(Chunk::completed()).unwrap();

        assert_eq!(first.payload, Bytes::from_static(b"first"));
        assert_eq!(second.payload, Bytes::from_static(b"second"));
        assert_eq!(second.received_bytes, 6);
    }

    fn wire(chunks: &[Chunk]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(&chunk.encode());
        }
        out
    }

    #[tokio::test]
    async fn test_receiver_runs_until_clean_eof() {
        let bytes = wire(&[
            pending(b"hello "),
            pending(b"world"),
            Chunk::completed(),
            Chunk::completed(),
        ]);
        let mut reader: &[u8] = &bytes;
        let mut receiver = Receiver::new("c1");
        let mut payloads = Vec::new();

        let stats = receiver
            .run(&mut reader, &CancellationToken::new(), |done| {
                payloads.push(done.payload);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(stats.transfers, 2);
        assert_eq!(stats.bytes, 11);
        assert_eq!(payloads[0], Bytes::from_static(b"hello world"));
        assert!(payloads[1].is_empty());
    }

    #[tokio::test]
    async fn test_receiver_handler_failure_does_not_stop_loop() {
        let bytes = wire(&[
            pending(b"bad"),
            Chunk::completed(),
            pending(b"good"),
            Chunk::completed(),
        ]);
        let mut reader: &[u8] = &bytes;
        let mut receiver = Receiver::new("c1");
        let mut seen = Vec::new();

        let stats = receiver
            .run(&mut reader, &CancellationToken::new(), |done| {
                seen.push(done.payload.clone());
                if done.payload == Bytes::from_static(b"bad") {
                    Err(PushError::Decode("not a zip".into()))
                } else {
                    Ok(())
                }
            })
            .await
            .unwrap();

        assert_eq!(stats.transfers, 2);
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(seen[1], Bytes::from_static(b"good"));
    }

    #[tokio::test]
    async fn test_receiver_truncated_stream_is_error() {
        let mut bytes = wire(&[pending(b"partial")]);
        bytes.truncate(bytes.len() - 3);
        let mut reader: &[u8] = &bytes;
        let mut receiver = Receiver::new("c1");

        let err = receiver
            .run(&mut reader, &CancellationToken::new(), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::ReceiveFailure(_)));
    }

    #[tokio::test]
    async fn test_receiver_surfaces_fatal() {
        let bytes = crate::streaming::protocol::Fatal::new(
            crate::streaming::protocol::FatalCode::UnsupportedVersion,
            "too new",
        )
        .encode();
        let mut reader: &[u8] = &bytes;
        let mut receiver = Receiver::new("c1");

        let err = receiver
            .run(&mut reader, &CancellationToken::new(), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, PushError::Rejected { code: 1, .. }));
    }

    #[tokio::test]
    async fn test_receiver_stops_on_shutdown() {
        let (mut client, _server) = tokio::io::duplex(64);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let mut receiver = Receiver::new("c1");
        let stats = receiver
            .run(&mut client, &shutdown, |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(stats.transfers, 0);
    }
}
