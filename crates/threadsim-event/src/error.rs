//! Codec error type.

use thiserror::Error;

/// Errors raised while encoding or decoding event messages. Any decode error
/// on ingress is a fatal protocol error for the sending node.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Message shorter than the fixed header.
    #[error("message too short for event header: {0} bytes")]
    HeaderTooShort(usize),

    /// Declared payload length disagrees with the received byte count.
    #[error("payload length mismatch: header declares {declared}, received {received}")]
    LengthMismatch { declared: usize, received: usize },

    /// Declared payload length exceeds the protocol maximum.
    #[error("payload length {0} exceeds the protocol maximum")]
    PayloadTooLong(usize),

    /// Unknown event kind byte.
    #[error("unknown event kind {0}")]
    UnknownKind(u8),

    /// Payload too short for the typed prefix of its event kind.
    #[error("truncated payload for event kind {kind:?}: {len} bytes")]
    TruncatedPayload { kind: crate::EventKind, len: usize },

    /// The repeated channel byte of a frame-carrying event disagrees with the
    /// typed prefix.
    #[error("channel mismatch in frame payload: {prefix} vs {repeat}")]
    ChannelMismatch { prefix: u8, repeat: u8 },
}
