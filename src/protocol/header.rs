//! Message header and opcodes

use bytes::BufMut;

use super::error::MalformedMessage;
use crate::constants::wire::HEADER_LEN;

/// Wire opcodes understood by the codec
///
/// OP_COMPRESSED (2012) is deliberately absent: compressed frames are
/// reported as [`MalformedMessage::UnknownOpCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum OpCode {
    Reply = 1,
    Update = 2001,
    Insert = 2002,
    Query = 2004,
    GetMore = 2005,
    Delete = 2006,
    KillCursors = 2007,
    Command = 2010,
    CommandReply = 2011,
    Msg = 2013,
}

impl OpCode {
    /// Raw wire value
    #[must_use]
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Reply => "OP_REPLY",
            Self::Update => "OP_UPDATE",
            Self::Insert => "OP_INSERT",
            Self::Query => "OP_QUERY",
            Self::GetMore => "OP_GET_MORE",
            Self::Delete => "OP_DELETE",
            Self::KillCursors => "OP_KILL_CURSORS",
            Self::Command => "OP_COMMAND",
            Self::CommandReply => "OP_COMMANDREPLY",
            Self::Msg => "OP_MSG",
        }
    }

    /// Whether a request with this opcode is answered by the server
    ///
    /// OP_MSG is answered unless `moreToCome` is set; that is decided per
    /// message by [`Message::has_response`](super::Message::has_response).
    #[must_use]
    pub const fn expects_reply(self) -> bool {
        matches!(self, Self::Query | Self::GetMore | Self::Command | Self::Msg)
    }
}

impl TryFrom<i32> for OpCode {
    type Error = MalformedMessage;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::Reply,
            2001 => Self::Update,
            2002 => Self::Insert,
            2004 => Self::Query,
            2005 => Self::GetMore,
            2006 => Self::Delete,
            2007 => Self::KillCursors,
            2010 => Self::Command,
            2011 => Self::CommandReply,
            2013 => Self::Msg,
            other => return Err(MalformedMessage::UnknownOpCode(other)),
        })
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The 16-byte little-endian header that prefixes every message
///
/// `size` covers the whole frame, header included. It is rewritten by
/// [`Message::serialize`](super::Message::serialize) and must not be
/// trusted after a message has been mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub size: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: OpCode,
}

impl MessageHeader {
    /// Header for a new message; `size` is filled in on serialization
    #[must_use]
    pub const fn new(op_code: OpCode, request_id: i32, response_to: i32) -> Self {
        Self {
            size: 0,
            request_id,
            response_to,
            op_code,
        }
    }

    /// Read the raw header fields without validating the opcode
    ///
    /// Returns `None` when fewer than 16 bytes are available.
    #[must_use]
    pub fn peek(buf: &[u8]) -> Option<RawHeader> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let field = |at: usize| i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        Some(RawHeader {
            size: field(0),
            request_id: field(4),
            response_to: field(8),
            op_code: field(12),
        })
    }

    /// Parse and validate a header from the front of `buf`
    pub fn parse(buf: &[u8]) -> Result<Self, MalformedMessage> {
        let raw = Self::peek(buf).ok_or(MalformedMessage::Truncated {
            field: "header",
            needed: HEADER_LEN,
            remaining: buf.len(),
        })?;
        raw.validate()
    }

    pub fn write_into(&self, out: &mut impl BufMut) {
        out.put_i32_le(self.size);
        out.put_i32_le(self.request_id);
        out.put_i32_le(self.response_to);
        out.put_i32_le(self.op_code.as_i32());
    }
}

/// Header fields as they appear on the wire, before opcode validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    pub size: i32,
    pub request_id: i32,
    pub response_to: i32,
    pub op_code: i32,
}

impl RawHeader {
    pub fn validate(self) -> Result<MessageHeader, MalformedMessage> {
        Ok(MessageHeader {
            size: self.size,
            request_id: self.request_id,
            response_to: self.response_to,
            op_code: OpCode::try_from(self.op_code)?,
        })
    }
}
