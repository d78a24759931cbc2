//! Binary codec for input channel frames.
//!
//! Wire format:
//! ```text
//! [version:1][msg_type:1][reserved:2][payload_len:4][seq:4][payload:N]
//! ```
//! Total header size: 12 bytes.  Header integers are big-endian; the payload
//! is the `bincode` encoding of the message body.

use thiserror::Error;

use crate::protocol::messages::{
    InputMessage, KeyEvent, MessageType, MotionEvent, HEADER_SIZE, PROTOCOL_VERSION,
};

/// Errors that can occur while encoding or decoding a frame.
#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    /// The byte slice is shorter than the header.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Sequence number zero is reserved.
    #[error("frame carries reserved sequence number 0")]
    ZeroSequence,

    /// The body could not be serialized or deserialized.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The header's length field points past the end of the data.
    #[error("payload length mismatch: header says {declared}, available is {available}")]
    PayloadLengthMismatch { declared: usize, available: usize },
}

impl From<bincode::Error> for CodecError {
    fn from(err: bincode::Error) -> Self {
        CodecError::MalformedPayload(err.to_string())
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes `msg` into a complete frame.
///
/// # Errors
///
/// Returns [`CodecError::ZeroSequence`] for a zero sequence number, or
/// [`CodecError::MalformedPayload`] if the body cannot be serialized.
///
/// # Examples
///
/// ```rust
/// use inputflow_core::protocol::{decode_message, encode_message, InputMessage};
///
/// let msg = InputMessage::Finished { seq: 7, handled: true };
/// let bytes = encode_message(&msg).unwrap();
/// let (decoded, consumed) = decode_message(&bytes).unwrap();
/// assert_eq!(decoded, msg);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_message(msg: &InputMessage) -> Result<Vec<u8>, CodecError> {
    let seq = msg.seq();
    if seq == 0 {
        return Err(CodecError::ZeroSequence);
    }

    let payload = match msg {
        InputMessage::Key { event, .. } => bincode::serialize(event)?,
        InputMessage::Motion { event, .. } => bincode::serialize(event)?,
        InputMessage::Finished { handled, .. } => bincode::serialize(handled)?,
    };
    let payload_len = payload.len() as u32;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.push(PROTOCOL_VERSION);
    buf.push(msg.message_type() as u8);
    buf.push(0x00); // reserved
    buf.push(0x00); // reserved
    buf.extend_from_slice(&payload_len.to_be_bytes());
    buf.extend_from_slice(&seq.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes one frame from the beginning of `bytes`.
///
/// Returns the message and the number of bytes consumed, so the caller can
/// advance its read cursor past the frame.
pub fn decode_message(bytes: &[u8]) -> Result<(InputMessage, usize), CodecError> {
    let header = peek_header(bytes)?;

    let total_needed = HEADER_SIZE + header.payload_len;
    if bytes.len() < total_needed {
        return Err(CodecError::PayloadLengthMismatch {
            declared: header.payload_len,
            available: bytes.len() - HEADER_SIZE,
        });
    }

    let payload = &bytes[HEADER_SIZE..total_needed];
    let seq = header.seq;
    let msg = match header.msg_type {
        MessageType::Key => InputMessage::Key {
            seq,
            event: bincode::deserialize::<KeyEvent>(payload)?,
        },
        MessageType::Motion => InputMessage::Motion {
            seq,
            event: bincode::deserialize::<MotionEvent>(payload)?,
        },
        MessageType::Finished => InputMessage::Finished {
            seq,
            handled: bincode::deserialize::<bool>(payload)?,
        },
    };
    Ok((msg, total_needed))
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub msg_type: MessageType,
    pub payload_len: usize,
    pub seq: u32,
}

impl FrameHeader {
    /// Length of the whole frame, header included.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len
    }
}

/// Validates and parses the header at the start of `bytes`.
pub fn peek_header(bytes: &[u8]) -> Result<FrameHeader, CodecError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CodecError::InsufficientData {
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let msg_type = MessageType::try_from(bytes[1])
        .map_err(|_| CodecError::UnknownMessageType(bytes[1]))?;

    // bytes[2..4] are reserved – ignored on decode

    let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let seq = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    if seq == 0 {
        return Err(CodecError::ZeroSequence);
    }

    Ok(FrameHeader {
        msg_type,
        payload_len,
        seq,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_message() -> InputMessage {
        InputMessage::Key {
            seq: 42,
            event: KeyEvent {
                device_id: 1,
                source: 0x101,
                action: 0,
                flags: 0,
                key_code: 29,
                scan_code: 30,
                meta_state: 0,
                repeat_count: 0,
                down_time: 1_000,
                event_time: 1_000,
            },
        }
    }

    #[test]
    fn test_header_layout() {
        // Arrange
        let msg = key_message();

        // Act
        let bytes = encode_message(&msg).expect("encode");

        // Assert
        assert_eq!(bytes[0], PROTOCOL_VERSION);
        assert_eq!(bytes[1], MessageType::Key as u8);
        assert_eq!(&bytes[2..4], &[0, 0]);
        let payload_len = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        assert_eq!(payload_len, bytes.len() - HEADER_SIZE);
        assert_eq!(u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]), 42);
    }

    #[test]
    fn test_decode_consumes_exactly_one_frame() {
        let mut bytes = encode_message(&key_message()).expect("encode");
        let first_len = bytes.len();
        bytes.extend(encode_message(&InputMessage::Finished { seq: 9, handled: false }).expect("encode"));

        let (first, consumed) = decode_message(&bytes).expect("decode");

        assert_eq!(first, key_message());
        assert_eq!(consumed, first_len);
    }

    #[test]
    fn test_encode_rejects_zero_sequence() {
        let msg = InputMessage::Finished { seq: 0, handled: true };

        assert_eq!(encode_message(&msg), Err(CodecError::ZeroSequence));
    }

    #[test]
    fn test_decode_short_header_is_insufficient_data() {
        let result = decode_message(&[PROTOCOL_VERSION, 0x01, 0, 0]);

        assert_eq!(
            result,
            Err(CodecError::InsufficientData {
                needed: HEADER_SIZE,
                available: 4
            })
        );
    }

    #[test]
    fn test_decode_unknown_version() {
        let mut bytes = encode_message(&key_message()).expect("encode");
        bytes[0] = 0x09;

        assert_eq!(decode_message(&bytes), Err(CodecError::UnsupportedVersion(0x09)));
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut bytes = encode_message(&key_message()).expect("encode");
        bytes[1] = 0xEE;

        assert_eq!(decode_message(&bytes), Err(CodecError::UnknownMessageType(0xEE)));
    }

    #[test]
    fn test_decode_truncated_payload() {
        let bytes = encode_message(&key_message()).expect("encode");
        let truncated = &bytes[..bytes.len() - 3];

        let result = decode_message(truncated);

        assert!(matches!(
            result,
            Err(CodecError::PayloadLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_decode_garbage_payload_is_malformed() {
        let mut bytes = encode_message(&InputMessage::Finished { seq: 3, handled: true })
            .expect("encode");
        let last = bytes.len() - 1;
        bytes[last] = 7; // not a valid bool

        assert!(matches!(
            decode_message(&bytes),
            Err(CodecError::MalformedPayload(_))
        ));
    }
}
