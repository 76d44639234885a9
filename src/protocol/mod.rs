//! MongoDB wire protocol codec
//!
//! - [`header`]: the 16-byte message header and opcodes
//! - [`document`]: raw embedded documents and first-level helpers
//! - [`message`]: typed messages and serialization
//! - [`parser`]: framing and parsing
//! - [`framed`]: async frame I/O
//! - [`reply`]: replies the proxy originates itself

pub mod document;
pub mod error;
pub mod framed;
pub mod header;
pub mod message;
pub mod parser;
pub mod reply;

pub use document::{
    SimpleBson, command_name, index_of_key, is_handshake_command, namespace_is_command,
    remove_key,
};
pub use error::MalformedMessage;
pub use framed::{FrameError, FramedStream, read_frame};
pub use header::{MessageHeader, OpCode};
pub use message::{
    CommandMessage, CommandReplyMessage, DeleteMessage, GetMoreMessage, InsertMessage,
    KillCursorsMessage, Message, MsgMessage, MsgSection, QueryMessage, ReplyMessage,
    UpdateMessage, msg_flags,
};
pub use parser::{decode, frame_len, parse_frame};
pub use reply::{error_reply, next_request_id, reply_with_document};
