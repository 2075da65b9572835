//! Wire messages for the push-transfer protocol.
//!
//! Unidirectional after registration: the client sends one REGISTER frame,
//! then only reads CHUNK frames until the stream ends. No ACKs.

use crate::error::{PushError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version; a server only accepts clients speaking exactly this one
pub const PROTOCOL_VERSION: u16 = 1;

/// Wire format: all multi-byte integers are big-endian
/// Strings are length-prefixed (u16 len + UTF-8)
/// Frame format: len:u32 | type:u8 | payload

/// Frame header size (len + type)
pub const FRAME_HEADER_SIZE: usize = 5;

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Register = 0x01,
    Chunk = 0x02,
    Fatal = 0x03,
}

impl MessageType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Register),
            0x02 => Some(Self::Chunk),
            0x03 => Some(Self::Fatal),
            _ => None,
        }
    }
}

// =============================================================================
// Fatal Codes
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FatalCode {
    UnsupportedVersion = 1,
    InvalidIdentity = 2,
    UnexpectedMessage = 3,
}

impl FatalCode {
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            1 => Some(Self::UnsupportedVersion),
            2 => Some(Self::InvalidIdentity),
            3 => Some(Self::UnexpectedMessage),
            _ => None,
        }
    }
}

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u16(s.len() as u16);
    buf.put_slice(s.as_bytes());
}

fn get_str(payload: &mut Bytes, what: &str) -> Result<String> {
    if payload.remaining() < 2 {
        return Err(PushError::Protocol(format!("{} length truncated", what)));
    }
    let len = payload.get_u16() as usize;
    if payload.remaining() < len {
        return Err(PushError::Protocol(format!(
            "{} truncated: expected {} bytes, got {}",
            what,
            len,
            payload.remaining()
        )));
    }
    String::from_utf8(payload.copy_to_bytes(len).to_vec())
        .map_err(|_| PushError::Protocol(format!("Invalid UTF-8 in {}", what)))
}

// =============================================================================
// REGISTER (0x01)
// =============================================================================

/// First and only frame a client sends on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub version: u16,
    pub client_id: String,
}

impl Register {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            client_id: client_id.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let payload_len = 2 + 2 + self.client_id.len();
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);

        buf.put_u32(payload_len as u32);
        buf.put_u8(MessageType::Register as u8);
        buf.put_u16(self.version);
        put_str(&mut buf, &self.client_id);

        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.remaining() < 2 {
            return Err(PushError::Protocol("Register payload too short".into()));
        }
        let version = payload.get_u16();
        let client_id = get_str(&mut payload, "Register client id")?;

        Ok(Self { version, client_id })
    }
}

// =============================================================================
// CHUNK (0x02)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransferStatus {
    Pending = 0,
    Completed = 1,
}

impl TransferStatus {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Pending),
            1 => Some(Self::Completed),
            _ => None,
        }
    }
}

/// One unit of a transfer. Completed chunks never carry content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub status: TransferStatus,
    pub content: Bytes,
}

impl Chunk {
    pub fn pending(content: Bytes) -> Self {
        Self {
            status: TransferStatus::Pending,
            content,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: TransferStatus::Completed,
            content: Bytes::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TransferStatus::Completed
    }

    pub fn encode(&self) -> Bytes {
        let content: &[u8] = match self.status {
            TransferStatus::Pending => &self.content,
            TransferStatus::Completed => &[],
        };
        let payload_len = CHUNK_OVERHEAD + content.len();

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_u32(payload_len as u32);
        buf.put_u8(MessageType::Chunk as u8);
        buf.put_u8(self.status as u8);
        buf.put_u32(content.len() as u32);
        buf.put_slice(content);

        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.remaining() < CHUNK_OVERHEAD {
            return Err(PushError::Protocol("Chunk payload too short".into()));
        }
        let raw_status = payload.get_u8();
        let status = TransferStatus::from_u8(raw_status).ok_or_else(|| {
            PushError::Protocol(format!("Unknown transfer status: {}", raw_status))
        })?;
        let content_len = payload.get_u32() as usize;
        if payload.remaining() < content_len {
            return Err(PushError::Protocol("Chunk content truncated".into()));
        }
        let content = match status {
            TransferStatus::Pending => payload.copy_to_bytes(content_len),
            // Content on a completion marker is ignored
            TransferStatus::Completed => Bytes::new(),
        };

        Ok(Self { status, content })
    }
}

// =============================================================================
// FATAL (0x03)
// =============================================================================

#[derive(Debug, Clone)]
pub struct Fatal {
    pub code: u16,
    pub message: String,
}

impl Fatal {
    pub fn new(code: FatalCode, message: impl Into<String>) -> Self {
        Self {
            code: code as u16,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let payload_len = 2 + 2 + self.message.len();
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload_len);
        buf.put_u32(payload_len as u32);
        buf.put_u8(MessageType::Fatal as u8);
        buf.put_u16(self.code);
        put_str(&mut buf, &self.message);
        buf.freeze()
    }

    pub fn decode(mut payload: Bytes) -> Result<Self> {
        if payload.remaining() < 2 {
            return Err(PushError::Protocol("Fatal payload too short".into()));
        }
        let code = payload.get_u16();
        let message = get_str(&mut payload, "Fatal message")?;
        Ok(Self { code, message })
    }

    pub fn into_error(self) -> PushError {
        PushError::Rejected {
            code: self.code,
            message: self.message,
        }
    }
}

// =============================================================================
// Frame reading/writing
// =============================================================================

/// Maximum frame size (64MB) - prevents OOM from malicious/corrupted frames
pub const MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Chunk payload overhead: status(1) + content_len(4)
const CHUNK_OVERHEAD: usize = 5;

/// Largest chunk content that still fits in one frame
pub const MAX_CHUNK_SIZE: usize = MAX_FRAME_SIZE as usize - CHUNK_OVERHEAD;

/// Read a single frame from the stream.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly at a frame
/// boundary. A stream that ends mid-frame is an error.
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
) -> Result<Option<(MessageType, Bytes)>> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = r.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(PushError::Io(ErrorKind::UnexpectedEof.into()));
        }
        filled += n;
    }
    let len = u32::from_be_bytes(header);

    // Validate frame size before allocation
    if len > MAX_FRAME_SIZE {
        return Err(PushError::Protocol(format!(
            "Frame size {} exceeds maximum allowed size {}",
            len, MAX_FRAME_SIZE
        )));
    }

    let msg_type = r.read_u8().await?;
    let msg_type = MessageType::from_u8(msg_type)
        .ok_or_else(|| PushError::Protocol(format!("Unknown message type: {:#04x}", msg_type)))?;

    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload).await?;

    Ok(Some((msg_type, Bytes::from(payload))))
}

/// Write a pre-encoded frame to the stream.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &Bytes) -> Result<()> {
    w.write_all(frame).await?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn payload_of(frame: &Bytes) -> Bytes {
        frame.slice(FRAME_HEADER_SIZE..)
    }

    #[test]
    fn test_register_roundtrip() {
        let reg = Register::new("0f3c9a");
        let encoded = reg.encode();
        assert_eq!(encoded[4], MessageType::Register as u8);

        let decoded = Register::decode(payload_of(&encoded)).unwrap();
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert_eq!(decoded.client_id, "0f3c9a");
    }

    #[test]
    fn test_register_truncated_id() {
        let mut buf = BytesMut::new();
        buf.put_u16(PROTOCOL_VERSION);
        buf.put_u16(10);
        buf.put_slice(b"abc");
        assert!(Register::decode(buf.freeze()).is_err());
    }

    #[test]
    fn test_pending_chunk_roundtrip() {
        let chunk = Chunk::pending(Bytes::from_static(b"PK\x03\x04data"));
        let decoded = Chunk::decode(payload_of(&chunk.encode())).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_completed_chunk_has_no_content() {
        let encoded = Chunk::completed().encode();
        // len(4) + type(1) + status(1) + content_len(4)
        assert_eq!(encoded.len(), 10);

        let decoded = Chunk::decode(payload_of(&encoded)).unwrap();
        assert!(decoded.is_completed());
        assert!(decoded.content.is_empty());
    }

    #[test]
    fn test_completed_chunk_content_ignored() {
        let mut buf = BytesMut::new();
        buf.put_u8(TransferStatus::Completed as u8);
        buf.put_u32(3);
        buf.put_slice(b"xyz");

        let decoded = Chunk::decode(buf.freeze()).unwrap();
        assert!(decoded.is_completed());
        assert!(decoded.content.is_empty());
    }

    #[test]
    fn test_chunk_unknown_status() {
        let mut buf = BytesMut::new();
        buf.put_u8(7);
        buf.put_u32(0);
        assert!(Chunk::decode(buf.freeze()).is_err());
    }

    #[test]
    fn test_fatal_roundtrip() {
        let fatal = Fatal::new(FatalCode::InvalidIdentity, "empty client id");
        let decoded = Fatal::decode(payload_of(&fatal.encode())).unwrap();
        assert_eq!(FatalCode::from_u16(decoded.code), Some(FatalCode::InvalidIdentity));
        assert_eq!(decoded.message, "empty client id");
    }

    #[test]
    fn test_message_type_from_u8() {
        assert_eq!(MessageType::from_u8(0x01), Some(MessageType::Register));
        assert_eq!(MessageType::from_u8(0x02), Some(MessageType::Chunk));
        assert_eq!(MessageType::from_u8(0x03), Some(MessageType::Fatal));
        assert_eq!(MessageType::from_u8(0xFF), None);
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof() {
        let mut empty: &[u8] = &[];
        assert!(read_frame(&mut empty).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_truncated_is_error() {
        let frame = Chunk::pending(Bytes::from_static(b"hello")).encode();
        let mut truncated: &[u8] = &frame[..frame.len() - 2];
        assert!(read_frame(&mut truncated).await.is_err());

        let mut partial_header: &[u8] = &frame[..2];
        assert!(read_frame(&mut partial_header).await.is_err());
    }

    #[tokio::test]
    async fn test_read_frame_rejects_oversized() {
        let mut buf = BytesMut::new();
        buf.put_u32(MAX_FRAME_SIZE + 1);
        buf.put_u8(MessageType::Chunk as u8);
        let bytes = buf.freeze();
        let mut reader: &[u8] = &bytes;
        assert!(read_frame(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_write_then_read_frames_in_order() {
        let mut wire = Vec::new();
        write_frame(&mut wire, &Register::new("a1").encode()).await.unwrap();
        write_frame(&mut wire, &Chunk::completed().encode()).await.unwrap();

        let mut reader: &[u8] = &wire;
        let (t1, _) = read_frame(&mut reader).await.unwrap().unwrap();
        let (t2, _) = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(t1, MessageType::Register);
        assert_eq!(t2, MessageType::Chunk);
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[test]
    fn test_max_chunk_fits_in_frame() {
        let chunk = Chunk::pending(Bytes::from(vec![0u8; 16]));
        let encoded = chunk.encode();
        let payload_len = u32::from_be_bytes([encoded[0], encoded[1], encoded[2], encoded[3]]);
        assert_eq!(payload_len as usize - 16, MAX_FRAME_SIZE as usize - MAX_CHUNK_SIZE);
    }
}
