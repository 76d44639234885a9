//! Frame parser
//!
//! Framing is length-prefixed: a frame is complete once `size` bytes are
//! buffered. Parsing then walks the payload with a bounded cursor; every
//! embedded document advances the cursor by exactly its own declared size.

use bytes::Bytes;

use super::document::SimpleBson;
use super::error::MalformedMessage;
use super::header::{MessageHeader, OpCode};
use super::message::{
    CommandMessage, CommandReplyMessage, DeleteMessage, GetMoreMessage, InsertMessage,
    KillCursorsMessage, Message, MsgMessage, MsgSection, QueryMessage, ReplyMessage,
    UpdateMessage, msg_flags,
};
use crate::constants::wire::{CHECKSUM_LEN, HEADER_LEN, MAX_MESSAGE_SIZE};

/// Length of the frame at the front of `buf`, if it is fully buffered
///
/// `Ok(None)` means more bytes are needed. A declared size outside
/// `16..=max_size` is an error because the stream can no longer be framed.
pub fn frame_len(buf: &[u8], max_size: usize) -> Result<Option<usize>, MalformedMessage> {
    let Some(raw) = MessageHeader::peek(buf) else {
        return Ok(None);
    };
    let size = checked_frame_size(raw.size, max_size)?;
    Ok((buf.len() >= size).then_some(size))
}

/// Validate a declared frame size against the header length and `max_size`
pub fn checked_frame_size(declared: i32, max_size: usize) -> Result<usize, MalformedMessage> {
    if declared < HEADER_LEN as i32 {
        return Err(MalformedMessage::SizeTooSmall(declared));
    }
    let size = declared as usize;
    if size > max_size {
        return Err(MalformedMessage::SizeTooLarge {
            size,
            max: max_size,
        });
    }
    Ok(size)
}

/// Decode one message from the front of `buf`
///
/// Returns `Ok(None)` when the frame is not yet fully buffered; the caller
/// should read more and try again.
pub fn decode(buf: &[u8]) -> Result<Option<Message>, MalformedMessage> {
    match frame_len(buf, MAX_MESSAGE_SIZE)? {
        Some(len) => parse_frame(Bytes::copy_from_slice(&buf[..len])).map(Some),
        None => Ok(None),
    }
}

/// Parse exactly one complete frame without copying its documents
pub fn parse_frame(frame: Bytes) -> Result<Message, MalformedMessage> {
    let header = MessageHeader::parse(&frame)?;
    let declared = usize::try_from(header.size).map_err(|_| MalformedMessage::SizeTooSmall(header.size))?;
    if declared < HEADER_LEN {
        return Err(MalformedMessage::SizeTooSmall(header.size));
    }
    if declared > frame.len() {
        return Err(MalformedMessage::Truncated {
            field: "message",
            needed: declared,
            remaining: frame.len(),
        });
    }
    if declared < frame.len() {
        return Err(MalformedMessage::TrailingBytes(frame.len() - declared));
    }

    let mut r = Cursor::new(frame.slice(HEADER_LEN..declared));
    let message = match header.op_code {
        OpCode::Reply => Message::Reply(ReplyMessage {
            header,
            flags: r.i32("responseFlags")?,
            cursor_id: r.i64("cursorID")?,
            starting_from: r.i32("startingFrom")?,
            number_returned: r.i32("numberReturned")?,
            documents: r.documents_to_end()?,
        }),
        OpCode::Update => {
            r.i32("ZERO")?;
            Message::Update(UpdateMessage {
                header,
                namespace: r.cstring("fullCollectionName")?,
                flags: r.i32("flags")?,
                filter: r.document()?,
                update: r.document()?,
            })
        }
        OpCode::Insert => Message::Insert(InsertMessage {
            header,
            flags: r.i32("flags")?,
            namespace: r.cstring("fullCollectionName")?,
            documents: r.documents_to_end()?,
        }),
        OpCode::Query => {
            let flags = r.i32("flags")?;
            let namespace = r.cstring("fullCollectionName")?;
            let skip = r.i32("numberToSkip")?;
            let limit = r.i32("numberToReturn")?;
            let query = r.document()?;
            let projection = if r.remaining() > 0 {
                Some(r.document()?)
            } else {
                None
            };
            Message::Query(QueryMessage {
                header,
                flags,
                namespace,
                skip,
                limit,
                query,
                projection,
            })
        }
        OpCode::GetMore => {
            r.i32("ZERO")?;
            Message::GetMore(GetMoreMessage {
                header,
                namespace: r.cstring("fullCollectionName")?,
                number_to_return: r.i32("numberToReturn")?,
                cursor_id: r.i64("cursorID")?,
            })
        }
        OpCode::Delete => {
            r.i32("ZERO")?;
            Message::Delete(DeleteMessage {
                header,
                namespace: r.cstring("fullCollectionName")?,
                flags: r.i32("flags")?,
                filter: r.document()?,
            })
        }
        OpCode::KillCursors => {
            r.i32("ZERO")?;
            let count = r.i32("numberOfCursorIDs")?;
            let count = usize::try_from(count).map_err(|_| MalformedMessage::Truncated {
                field: "cursorIDs",
                needed: 0,
                remaining: r.remaining(),
            })?;
            r.need("cursorIDs", count.saturating_mul(8))?;
            let cursor_ids = (0..count)
                .map(|_| r.i64("cursorID"))
                .collect::<Result<_, _>>()?;
            Message::KillCursors(KillCursorsMessage { header, cursor_ids })
        }
        OpCode::Command => Message::Command(CommandMessage {
            header,
            database: r.cstring("database")?,
            command_name: r.cstring("commandName")?,
            command_args: r.document()?,
            metadata: r.document()?,
            input_docs: r.documents_to_end()?,
        }),
        OpCode::CommandReply => Message::CommandReply(CommandReplyMessage {
            header,
            command_reply: r.document()?,
            metadata: r.document()?,
            output_docs: r.documents_to_end()?,
        }),
        OpCode::Msg => Message::Msg(parse_msg(header, &mut r)?),
    };
    r.expect_end()?;
    Ok(message)
}

fn parse_msg(header: MessageHeader, r: &mut Cursor) -> Result<MsgMessage, MalformedMessage> {
    let flags = r.u32("flagBits")?;
    let checksum = if flags & msg_flags::CHECKSUM_PRESENT != 0 {
        Some(r.take_checksum()?)
    } else {
        None
    };

    let mut sections = Vec::new();
    while r.remaining() > 0 {
        match r.u8("section kind")? {
            0 => sections.push(MsgSection::Body(r.document()?)),
            1 => {
                let size = r.i32("section size")?;
                let body_len = usize::try_from(size)
                    .ok()
                    .and_then(|s| s.checked_sub(4))
                    .ok_or(MalformedMessage::InvalidDocumentSize(size))?;
                let mut seq = r.sub_cursor("document sequence", body_len)?;
                let identifier = seq.cstring("sequence identifier")?;
                let documents = seq.documents_to_end()?;
                sections.push(MsgSection::Sequence {
                    identifier,
                    documents,
                });
            }
            kind => return Err(MalformedMessage::UnknownSectionKind(kind)),
        }
    }

    if !sections.iter().any(|s| matches!(s, MsgSection::Body(_))) {
        return Err(MalformedMessage::MissingBody);
    }

    Ok(MsgMessage {
        header,
        flags,
        sections,
        checksum,
    })
}

/// Bounded read cursor over a frame payload
struct Cursor {
    buf: Bytes,
    pos: usize,
}

impl Cursor {
    fn new(buf: Bytes) -> Self {
        Self { buf, pos: 0 }
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn need(&self, field: &'static str, needed: usize) -> Result<(), MalformedMessage> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(MalformedMessage::Truncated {
                field,
                needed,
                remaining,
            });
        }
        Ok(())
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], MalformedMessage> {
        self.need(field, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(out)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, MalformedMessage> {
        Ok(self.array::<1>(field)?[0])
    }

    fn i32(&mut self, field: &'static str) -> Result<i32, MalformedMessage> {
        self.array(field).map(i32::from_le_bytes)
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, MalformedMessage> {
        self.array(field).map(u32::from_le_bytes)
    }

    fn i64(&mut self, field: &'static str) -> Result<i64, MalformedMessage> {
        self.array(field).map(i64::from_le_bytes)
    }

    fn cstring(&mut self, field: &'static str) -> Result<String, MalformedMessage> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(MalformedMessage::UnterminatedCString(field))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| MalformedMessage::InvalidUtf8(field))?
            .to_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    fn document(&mut self) -> Result<SimpleBson, MalformedMessage> {
        let doc = SimpleBson::parse_at(&self.buf, self.pos)?;
        self.pos += doc.len();
        Ok(doc)
    }

    /// Every remaining byte as consecutive documents, in order
    fn documents_to_end(&mut self) -> Result<Vec<SimpleBson>, MalformedMessage> {
        let mut docs = Vec::new();
        while self.remaining() > 0 {
            docs.push(self.document()?);
        }
        Ok(docs)
    }

    fn sub_cursor(&mut self, field: &'static str, len: usize) -> Result<Cursor, MalformedMessage> {
        self.need(field, len)?;
        let sub = Cursor::new(self.buf.slice(self.pos..self.pos + len));
        self.pos += len;
        Ok(sub)
    }

    /// Split the trailing CRC-32C off the end of the payload
    fn take_checksum(&mut self) -> Result<u32, MalformedMessage> {
        self.need("checksum", CHECKSUM_LEN)?;
        let at = self.buf.len() - CHECKSUM_LEN;
        let checksum = u32::from_le_bytes([
            self.buf[at],
            self.buf[at + 1],
            self.buf[at + 2],
            self.buf[at + 3],
        ]);
        self.buf.truncate(at);
        Ok(checksum)
    }

    fn expect_end(&self) -> Result<(), MalformedMessage> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(MalformedMessage::TrailingBytes(n)),
        }
    }
}
