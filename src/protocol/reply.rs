//! Proxy-originated replies
//!
//! When the proxy answers a request itself (an error, or a reply synthesized
//! by an interceptor) the reply must use the framing the client's request
//! implies: OP_MSG is answered with OP_MSG, legacy queries with OP_REPLY and
//! OP_COMMAND with OP_COMMANDREPLY.

use std::sync::atomic::{AtomicI32, Ordering};

use super::document::SimpleBson;
use super::error::MalformedMessage;
use super::header::{MessageHeader, OpCode};
use super::message::{CommandReplyMessage, Message, MsgMessage, MsgSection, ReplyMessage};
use crate::mongo_error::MongoError;

static NEXT_REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Request id for a message the proxy originates
#[must_use]
pub fn next_request_id() -> i32 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Wrap `doc` in a reply to `request`
///
/// Returns `None` for opcodes the server never answers.
#[must_use]
pub fn reply_with_document(request: &MessageHeader, doc: SimpleBson) -> Option<Message> {
    let header = |op| MessageHeader::new(op, next_request_id(), request.request_id);
    match request.op_code {
        OpCode::Msg => Some(Message::Msg(MsgMessage {
            header: header(OpCode::Msg),
            flags: 0,
            sections: vec![MsgSection::Body(doc)],
            checksum: None,
        })),
        OpCode::Query | OpCode::GetMore => Some(Message::Reply(ReplyMessage {
            header: header(OpCode::Reply),
            flags: 0,
            cursor_id: 0,
            starting_from: 0,
            number_returned: 1,
            documents: vec![doc],
        })),
        OpCode::Command => Some(Message::CommandReply(CommandReplyMessage {
            header: header(OpCode::CommandReply),
            command_reply: doc,
            metadata: SimpleBson::empty(),
            output_docs: Vec::new(),
        })),
        OpCode::Reply
        | OpCode::Update
        | OpCode::Insert
        | OpCode::Delete
        | OpCode::KillCursors
        | OpCode::CommandReply => None,
    }
}

/// Render `error` as a reply to `request`
pub fn error_reply(
    request: &MessageHeader,
    error: &MongoError,
) -> Result<Option<Message>, MalformedMessage> {
    let doc = SimpleBson::from_document(&error.to_bson())?;
    Ok(reply_with_document(request, doc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mongo_error::codes;

    fn request(op: OpCode) -> MessageHeader {
        MessageHeader::new(op, 4242, 0)
    }

    fn error() -> MongoError {
        MongoError::from_code(codes::HOST_UNREACHABLE, "no backend")
    }

    #[test]
    fn test_reply_kind_follows_request_kind() {
        let cases = [
            (OpCode::Msg, Some(OpCode::Msg)),
            (OpCode::Query, Some(OpCode::Reply)),
            (OpCode::GetMore, Some(OpCode::Reply)),
            (OpCode::Command, Some(OpCode::CommandReply)),
            (OpCode::Insert, None),
            (OpCode::KillCursors, None),
        ];
        for (op, expected) in cases {
            let reply = error_reply(&request(op), &error()).unwrap();
            assert_eq!(reply.map(|m| m.op_code()), expected, "request {op}");
        }
    }

    #[test]
    fn test_response_to_matches_request_id() {
        let reply = error_reply(&request(OpCode::Msg), &error()).unwrap().unwrap();
        assert_eq!(reply.header().response_to, 4242);
        assert_ne!(reply.header().request_id, 0);
    }

    #[test]
    fn test_error_document_is_carried() {
        let Some(Message::Reply(reply)) = error_reply(&request(OpCode::Query), &error()).unwrap()
        else {
            panic!("expected OP_REPLY");
        };
        assert_eq!(reply.number_returned, 1);
        let doc = reply.documents[0].to_document().unwrap();
        assert_eq!(doc.get_i32("ok").unwrap(), 0);
        assert_eq!(doc.get_i32("code").unwrap(), 6);
    }

    #[test]
    fn test_request_ids_increase() {
        let a = next_request_id();
        let b = next_request_id();
        assert!(b > a);
    }
}
