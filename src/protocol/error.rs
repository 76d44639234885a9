//! Codec error type

use thiserror::Error;

/// A frame that cannot be turned into a [`Message`](super::Message)
///
/// Returned by the parser when the bytes on the wire contradict their own
/// framing. An incomplete frame is *not* an error; see [`decode`](super::decode).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum MalformedMessage {
    #[error("declared message size {0} is smaller than the 16-byte header")]
    SizeTooSmall(i32),

    #[error("declared message size {size} exceeds the {max}-byte limit")]
    SizeTooLarge { size: usize, max: usize },

    #[error("unrecognized opCode {0}")]
    UnknownOpCode(i32),

    #[error("embedded document declares {declared} bytes but only {remaining} remain")]
    DocumentOverrun { declared: usize, remaining: usize },

    #[error("embedded document declares an invalid size of {0} bytes")]
    InvalidDocumentSize(i32),

    #[error("{field} truncated: needed {needed} bytes, {remaining} remain")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("unterminated C string in {0}")]
    UnterminatedCString(&'static str),

    #[error("C string in {0} is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("unknown OP_MSG section kind {0}")]
    UnknownSectionKind(u8),

    #[error("OP_MSG has no body section")]
    MissingBody,

    #[error("{0} unexpected trailing bytes after message body")]
    TrailingBytes(usize),

    #[error("invalid BSON: {0}")]
    InvalidBson(String),

    #[error("expected a reply but got {0}")]
    NotAReply(super::OpCode),

    #[error("reply answers request {actual}, expected {expected}")]
    ResponseToMismatch { expected: i32, actual: i32 },
}

impl From<bson::raw::Error> for MalformedMessage {
    fn from(err: bson::raw::Error) -> Self {
        Self::InvalidBson(err.to_string())
    }
}

impl From<bson::de::Error> for MalformedMessage {
    fn from(err: bson::de::Error) -> Self {
        Self::InvalidBson(err.to_string())
    }
}

impl From<bson::ser::Error> for MalformedMessage {
    fn from(err: bson::ser::Error) -> Self {
        Self::InvalidBson(err.to_string())
    }
}
