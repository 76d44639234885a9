//! Typed wire messages and their serialization
//!
//! Every opcode the codec understands has a struct here. [`Message`] is the
//! closed set the session and interceptors pass around. Serialization always
//! re-measures the frame: the `size` stored in a header is only trusted until
//! the message is mutated.

use bytes::{BufMut, Bytes, BytesMut};

use super::document::SimpleBson;
use super::header::{MessageHeader, OpCode};
use crate::constants::wire::{CHECKSUM_LEN, HEADER_LEN};

/// OP_MSG flag bits
pub mod msg_flags {
    pub const CHECKSUM_PRESENT: u32 = 1 << 0;
    pub const MORE_TO_COME: u32 = 1 << 1;
    pub const EXHAUST_ALLOWED: u32 = 1 << 16;
}

/// Legacy query (`OP_QUERY`, 2004)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMessage {
    pub header: MessageHeader,
    pub flags: i32,
    pub namespace: String,
    pub skip: i32,
    pub limit: i32,
    pub query: SimpleBson,
    pub projection: Option<SimpleBson>,
}

/// Legacy reply (`OP_REPLY`, 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyMessage {
    pub header: MessageHeader,
    pub flags: i32,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub number_returned: i32,
    pub documents: Vec<SimpleBson>,
}

/// Legacy update (`OP_UPDATE`, 2001)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateMessage {
    pub header: MessageHeader,
    pub namespace: String,
    pub flags: i32,
    pub filter: SimpleBson,
    pub update: SimpleBson,
}

/// Legacy insert (`OP_INSERT`, 2002)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertMessage {
    pub header: MessageHeader,
    pub flags: i32,
    pub namespace: String,
    pub documents: Vec<SimpleBson>,
}

/// Legacy cursor continuation (`OP_GET_MORE`, 2005)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMoreMessage {
    pub header: MessageHeader,
    pub namespace: String,
    pub number_to_return: i32,
    pub cursor_id: i64,
}

/// Legacy delete (`OP_DELETE`, 2006)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteMessage {
    pub header: MessageHeader,
    pub namespace: String,
    pub flags: i32,
    pub filter: SimpleBson,
}

/// Legacy cursor cleanup (`OP_KILL_CURSORS`, 2007)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillCursorsMessage {
    pub header: MessageHeader,
    pub cursor_ids: Vec<i64>,
}

/// Command request (`OP_COMMAND`, 2010)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMessage {
    pub header: MessageHeader,
    pub database: String,
    pub command_name: String,
    pub command_args: SimpleBson,
    pub metadata: SimpleBson,
    pub input_docs: Vec<SimpleBson>,
}

/// Command reply (`OP_COMMANDREPLY`, 2011)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReplyMessage {
    pub header: MessageHeader,
    pub command_reply: SimpleBson,
    pub metadata: SimpleBson,
    pub output_docs: Vec<SimpleBson>,
}

/// One section of an OP_MSG
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MsgSection {
    /// Kind 0: the single command body
    Body(SimpleBson),
    /// Kind 1: a named sequence of documents (e.g. `documents` for insert)
    Sequence {
        identifier: String,
        documents: Vec<SimpleBson>,
    },
}

impl MsgSection {
    fn encoded_len(&self) -> usize {
        1 + match self {
            Self::Body(doc) => doc.len(),
            Self::Sequence {
                identifier,
                documents,
            } => 4 + identifier.len() + 1 + documents.iter().map(SimpleBson::len).sum::<usize>(),
        }
    }

    fn write_into(&self, out: &mut BytesMut) {
        match self {
            Self::Body(doc) => {
                out.put_u8(0);
                doc.write_into(out);
            }
            Self::Sequence {
                identifier,
                documents,
            } => {
                out.put_u8(1);
                let size = self.encoded_len() - 1;
                out.put_i32_le(size as i32);
                put_cstring(out, identifier);
                for doc in documents {
                    doc.write_into(out);
                }
            }
        }
    }
}

/// Extensible message format (`OP_MSG`, 2013)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgMessage {
    pub header: MessageHeader,
    pub flags: u32,
    pub sections: Vec<MsgSection>,
    /// CRC-32C trailer, carried verbatim when `checksumPresent` is set
    pub checksum: Option<u32>,
}

impl MsgMessage {
    /// The kind-0 body section
    #[must_use]
    pub fn body(&self) -> Option<&SimpleBson> {
        self.sections.iter().find_map(|s| match s {
            MsgSection::Body(doc) => Some(doc),
            MsgSection::Sequence { .. } => None,
        })
    }

    /// Replace the body, dropping the now-stale checksum
    pub fn set_body(&mut self, body: SimpleBson) {
        for section in &mut self.sections {
            if let MsgSection::Body(doc) = section {
                *doc = body;
                self.strip_checksum();
                return;
            }
        }
        self.sections.insert(0, MsgSection::Body(body));
        self.strip_checksum();
    }

    #[must_use]
    pub const fn more_to_come(&self) -> bool {
        self.flags & msg_flags::MORE_TO_COME != 0
    }

    #[must_use]
    pub const fn exhaust_allowed(&self) -> bool {
        self.flags & msg_flags::EXHAUST_ALLOWED != 0
    }

    /// Clear `exhaustAllowed` so the server answers with exactly one reply
    ///
    /// Returns whether the flag was set.
    pub fn clear_exhaust_allowed(&mut self) -> bool {
        if !self.exhaust_allowed() {
            return false;
        }
        self.flags &= !msg_flags::EXHAUST_ALLOWED;
        self.strip_checksum();
        true
    }

    /// Drop the checksum trailer; required after any rewrite
    pub fn strip_checksum(&mut self) {
        self.checksum = None;
        self.flags &= !msg_flags::CHECKSUM_PRESENT;
    }
}

/// Any message the codec can parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Reply(ReplyMessage),
    Update(UpdateMessage),
    Insert(InsertMessage),
    Query(QueryMessage),
    GetMore(GetMoreMessage),
    Delete(DeleteMessage),
    KillCursors(KillCursorsMessage),
    Command(CommandMessage),
    CommandReply(CommandReplyMessage),
    Msg(MsgMessage),
}

impl Message {
    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        match self {
            Self::Reply(m) => &m.header,
            Self::Update(m) => &m.header,
            Self::Insert(m) => &m.header,
            Self::Query(m) => &m.header,
            Self::GetMore(m) => &m.header,
            Self::Delete(m) => &m.header,
            Self::KillCursors(m) => &m.header,
            Self::Command(m) => &m.header,
            Self::CommandReply(m) => &m.header,
            Self::Msg(m) => &m.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut MessageHeader {
        match self {
            Self::Reply(m) => &mut m.header,
            Self::Update(m) => &mut m.header,
            Self::Insert(m) => &mut m.header,
            Self::Query(m) => &mut m.header,
            Self::GetMore(m) => &mut m.header,
            Self::Delete(m) => &mut m.header,
            Self::KillCursors(m) => &mut m.header,
            Self::Command(m) => &mut m.header,
            Self::CommandReply(m) => &mut m.header,
            Self::Msg(m) => &mut m.header,
        }
    }

    #[must_use]
    #[inline]
    pub fn op_code(&self) -> OpCode {
        self.header().op_code
    }

    #[must_use]
    #[inline]
    pub fn request_id(&self) -> i32 {
        self.header().request_id
    }

    /// Whether the peer will answer this message
    #[must_use]
    pub fn has_response(&self) -> bool {
        match self {
            Self::Msg(m) => !m.more_to_come(),
            other => other.op_code().expects_reply(),
        }
    }

    /// Whether a server may send this opcode as a reply
    ///
    /// OP_MSG travels both ways, so only `responseTo` tells a reply apart.
    #[must_use]
    pub fn can_be_reply(&self) -> bool {
        matches!(self, Self::Reply(_) | Self::CommandReply(_) | Self::Msg(_))
    }

    /// Exact serialized length, header included
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload_len()
    }

    fn payload_len(&self) -> usize {
        fn docs(d: &[SimpleBson]) -> usize {
            d.iter().map(SimpleBson::len).sum()
        }
        fn cstr(s: &str) -> usize {
            s.len() + 1
        }
        match self {
            Self::Reply(m) => 4 + 8 + 4 + 4 + docs(&m.documents),
            Self::Update(m) => 4 + cstr(&m.namespace) + 4 + m.filter.len() + m.update.len(),
            Self::Insert(m) => 4 + cstr(&m.namespace) + docs(&m.documents),
            Self::Query(m) => {
                4 + cstr(&m.namespace)
                    + 4
                    + 4
                    + m.query.len()
                    + m.projection.as_ref().map_or(0, SimpleBson::len)
            }
            Self::GetMore(m) => 4 + cstr(&m.namespace) + 4 + 8,
            Self::Delete(m) => 4 + cstr(&m.namespace) + 4 + m.filter.len(),
            Self::KillCursors(m) => 4 + 4 + 8 * m.cursor_ids.len(),
            Self::Command(m) => {
                cstr(&m.database)
                    + cstr(&m.command_name)
                    + m.command_args.len()
                    + m.metadata.len()
                    + docs(&m.input_docs)
            }
            Self::CommandReply(m) => m.command_reply.len() + m.metadata.len() + docs(&m.output_docs),
            Self::Msg(m) => {
                4 + m.sections.iter().map(MsgSection::encoded_len).sum::<usize>()
                    + m.checksum.map_or(0, |_| CHECKSUM_LEN)
            }
        }
    }

    /// Recompute the header size and encode the whole frame
    pub fn serialize(&mut self) -> Bytes {
        let len = self.encoded_len();
        self.header_mut().size = len as i32;
        self.encode()
    }

    /// Encode with a freshly measured size, leaving `self` untouched
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let len = self.encoded_len();
        let mut out = BytesMut::with_capacity(len);
        let mut header = *self.header();
        header.size = len as i32;
        header.write_into(&mut out);
        self.write_payload(&mut out);
        debug_assert_eq!(out.len(), len);
        out.freeze()
    }

    fn write_payload(&self, out: &mut BytesMut) {
        match self {
            Self::Reply(m) => {
                out.put_i32_le(m.flags);
                out.put_i64_le(m.cursor_id);
                out.put_i32_le(m.starting_from);
                out.put_i32_le(m.number_returned);
                m.documents.iter().for_each(|d| d.write_into(out));
            }
            Self::Update(m) => {
                out.put_i32_le(0);
                put_cstring(out, &m.namespace);
                out.put_i32_le(m.flags);
                m.filter.write_into(out);
                m.update.write_into(out);
            }
            Self::Insert(m) => {
                out.put_i32_le(m.flags);
                put_cstring(out, &m.namespace);
                m.documents.iter().for_each(|d| d.write_into(out));
            }
            Self::Query(m) => {
                out.put_i32_le(m.flags);
                put_cstring(out, &m.namespace);
                out.put_i32_le(m.skip);
                out.put_i32_le(m.limit);
                m.query.write_into(out);
                if let Some(projection) = &m.projection {
                    projection.write_into(out);
                }
            }
            Self::GetMore(m) => {
                out.put_i32_le(0);
                put_cstring(out, &m.namespace);
                out.put_i32_le(m.number_to_return);
                out.put_i64_le(m.cursor_id);
            }
            Self::Delete(m) => {
                out.put_i32_le(0);
                put_cstring(out, &m.namespace);
                out.put_i32_le(m.flags);
                m.filter.write_into(out);
            }
            Self::KillCursors(m) => {
                out.put_i32_le(0);
                out.put_i32_le(m.cursor_ids.len() as i32);
                m.cursor_ids.iter().for_each(|id| out.put_i64_le(*id));
            }
            Self::Command(m) => {
                put_cstring(out, &m.database);
                put_cstring(out, &m.command_name);
                m.command_args.write_into(out);
                m.metadata.write_into(out);
                m.input_docs.iter().for_each(|d| d.write_into(out));
            }
            Self::CommandReply(m) => {
                m.command_reply.write_into(out);
                m.metadata.write_into(out);
                m.output_docs.iter().for_each(|d| d.write_into(out));
            }
            Self::Msg(m) => {
                out.put_u32_le(m.flags);
                m.sections.iter().for_each(|s| s.write_into(out));
                if let Some(checksum) = m.checksum {
                    out.put_u32_le(checksum);
                }
            }
        }
    }
}

fn put_cstring(out: &mut BytesMut, s: &str) {
    out.put_slice(s.as_bytes());
    out.put_u8(0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn simple(d: bson::Document) -> SimpleBson {
        SimpleBson::from_document(&d).unwrap()
    }

    fn msg(flags: u32, sections: Vec<MsgSection>) -> Message {
        Message::Msg(MsgMessage {
            header: MessageHeader::new(OpCode::Msg, 1, 0),
            flags,
            sections,
            checksum: None,
        })
    }

    #[test]
    fn test_serialize_recomputes_size() {
        let mut m = Message::Query(QueryMessage {
            header: MessageHeader {
                size: 9999,
                ..MessageHeader::new(OpCode::Query, 5, 0)
            },
            flags: 0,
            namespace: "admin.$cmd".into(),
            skip: 0,
            limit: -1,
            query: simple(doc! { "isMaster": 1 }),
            projection: None,
        });
        let bytes = m.serialize();
        assert_eq!(m.header().size as usize, bytes.len());
        assert_eq!(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), m.header().size);
    }

    #[test]
    fn test_command_reply_size_is_header_plus_documents() {
        let reply = simple(doc! { "ok": 1 });
        let metadata = simple(doc! {});
        let output = vec![simple(doc! { "x": 1 }), simple(doc! { "y": "z" })];
        let expected = 16 + reply.len() + metadata.len() + output.iter().map(SimpleBson::len).sum::<usize>();

        let m = Message::CommandReply(CommandReplyMessage {
            header: MessageHeader::new(OpCode::CommandReply, 1, 1),
            command_reply: reply,
            metadata,
            output_docs: output,
        });
        assert_eq!(m.encoded_len(), expected);
        assert_eq!(m.encode().len(), expected);
    }

    #[test]
    fn test_has_response_by_kind() {
        assert!(msg(0, vec![MsgSection::Body(simple(doc! { "ping": 1 }))]).has_response());
        assert!(!msg(msg_flags::MORE_TO_COME, vec![]).has_response());

        let kill = Message::KillCursors(KillCursorsMessage {
            header: MessageHeader::new(OpCode::KillCursors, 1, 0),
            cursor_ids: vec![1, 2],
        });
        assert!(!kill.has_response());
    }

    #[test]
    fn test_clear_exhaust_drops_checksum() {
        let mut m = MsgMessage {
            header: MessageHeader::new(OpCode::Msg, 1, 0),
            flags: msg_flags::EXHAUST_ALLOWED | msg_flags::CHECKSUM_PRESENT,
            sections: vec![MsgSection::Body(simple(doc! { "getMore": 1i64 }))],
            checksum: Some(0xdead_beef),
        };
        assert!(m.clear_exhaust_allowed());
        assert_eq!(m.flags, 0);
        assert!(m.checksum.is_none());
        assert!(!m.clear_exhaust_allowed());
    }

    #[test]
    fn test_sequence_section_length_prefix() {
        let docs = vec![simple(doc! { "_id": 1 }), simple(doc! { "_id": 2 })];
        let docs_len: usize = docs.iter().map(SimpleBson::len).sum();
        let m = msg(
            0,
            vec![
                MsgSection::Body(simple(doc! { "insert": "c" })),
                MsgSection::Sequence {
                    identifier: "documents".into(),
                    documents: docs,
                },
            ],
        );
        let bytes = m.encode();
        let Message::Msg(inner) = &m else { unreachable!() };
        let body_len = inner.body().unwrap().len();
        // header + flags + kind byte + body + kind byte
        let seq_at = 16 + 4 + 1 + body_len + 1;
        let declared = i32::from_le_bytes(bytes[seq_at..seq_at + 4].try_into().unwrap()) as usize;
        assert_eq!(declared, 4 + "documents".len() + 1 + docs_len);
    }

    #[test]
    fn test_set_body_replaces_existing() {
        let mut m = MsgMessage {
            header: MessageHeader::new(OpCode::Msg, 1, 0),
            flags: 0,
            sections: vec![MsgSection::Body(simple(doc! { "a": 1 }))],
            checksum: None,
        };
        m.set_body(simple(doc! { "b": 2 }));
        assert_eq!(m.sections.len(), 1);
        assert_eq!(m.body().unwrap().to_document().unwrap(), doc! { "b": 2 });
    }
}
