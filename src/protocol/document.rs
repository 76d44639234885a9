//! Raw embedded documents and first-level document helpers
//!
//! Messages keep their embedded documents as opaque, self-sized byte spans
//! ([`SimpleBson`]). They are only decoded when an interceptor needs to look
//! inside, and a mutated document is always rebuilt from its decoded
//! key/value sequence rather than spliced in place.

use bson::{Document, RawDocument};
use bytes::{BufMut, Bytes};

use super::error::MalformedMessage;
use crate::constants::wire::MIN_DOCUMENT_LEN;

/// Administrative commands that open a connection handshake
const HANDSHAKE_COMMANDS: &[&str] = &["ismaster", "hello"];

const EMPTY_DOCUMENT: &[u8] = &[5, 0, 0, 0, 0];

/// An embedded document kept as raw bytes plus its recorded size
///
/// Cloning is cheap: the bytes are reference-counted slices of the frame
/// they were parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SimpleBson {
    size: i32,
    bytes: Bytes,
}

impl SimpleBson {
    /// Slice the document that starts at `offset` out of `frame`
    ///
    /// The document's own 4-byte length decides how far the span reaches.
    pub fn parse_at(frame: &Bytes, offset: usize) -> Result<Self, MalformedMessage> {
        let remaining = frame.len().saturating_sub(offset);
        if remaining < 4 {
            return Err(MalformedMessage::Truncated {
                field: "document length",
                needed: 4,
                remaining,
            });
        }
        let size = i32::from_le_bytes([
            frame[offset],
            frame[offset + 1],
            frame[offset + 2],
            frame[offset + 3],
        ]);
        if size < MIN_DOCUMENT_LEN as i32 {
            return Err(MalformedMessage::InvalidDocumentSize(size));
        }
        let declared = size as usize;
        if declared > remaining {
            return Err(MalformedMessage::DocumentOverrun {
                declared,
                remaining,
            });
        }
        Ok(Self {
            size,
            bytes: frame.slice(offset..offset + declared),
        })
    }

    /// Wrap a standalone document buffer, checking its length prefix
    pub fn from_bytes(bytes: Bytes) -> Result<Self, MalformedMessage> {
        let doc = Self::parse_at(&bytes, 0)?;
        if doc.len() != bytes.len() {
            return Err(MalformedMessage::TrailingBytes(bytes.len() - doc.len()));
        }
        Ok(doc)
    }

    /// The empty document `{}`
    #[must_use]
    pub fn empty() -> Self {
        Self {
            size: EMPTY_DOCUMENT.len() as i32,
            bytes: Bytes::from_static(EMPTY_DOCUMENT),
        }
    }

    /// Encode a decoded document
    pub fn from_document(doc: &Document) -> Result<Self, MalformedMessage> {
        let mut buf = Vec::new();
        doc.to_writer(&mut buf)?;
        Self::from_bytes(Bytes::from(buf))
    }

    /// Fully decode into an ordered document
    pub fn to_document(&self) -> Result<Document, MalformedMessage> {
        Ok(Document::from_reader(&mut self.bytes.as_ref())?)
    }

    /// Borrow as a lazily-validated raw document
    pub fn as_raw(&self) -> Result<&RawDocument, MalformedMessage> {
        Ok(RawDocument::from_bytes(&self.bytes)?)
    }

    /// Recorded size (the document's length prefix)
    #[must_use]
    #[inline]
    pub const fn size(&self) -> i32 {
        self.size
    }

    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn write_into(&self, out: &mut impl BufMut) {
        out.put_slice(&self.bytes);
    }
}

impl TryFrom<&Document> for SimpleBson {
    type Error = MalformedMessage;

    fn try_from(doc: &Document) -> Result<Self, Self::Error> {
        Self::from_document(doc)
    }
}

/// Position of the first element whose key equals `key` (case-sensitive)
#[must_use]
pub fn index_of_key(doc: &Document, key: &str) -> Option<usize> {
    doc.keys().position(|k| k == key)
}

/// Drop the element at `index`, keeping the order of the rest
#[must_use]
pub fn without_index(doc: Document, index: usize) -> Document {
    doc.into_iter()
        .enumerate()
        .filter_map(|(i, entry)| (i != index).then_some(entry))
        .collect()
}

/// Rebuild `doc` without its first `key` element
///
/// Returns `Ok(None)` when the key is absent so callers can leave the
/// original bytes untouched.
pub fn remove_key(doc: &SimpleBson, key: &str) -> Result<Option<SimpleBson>, MalformedMessage> {
    let decoded = doc.to_document()?;
    match index_of_key(&decoded, key) {
        Some(index) => SimpleBson::from_document(&without_index(decoded, index)).map(Some),
        None => Ok(None),
    }
}

/// Key of the first element, which names the command in a command document
pub fn command_name(doc: &SimpleBson) -> Result<Option<String>, MalformedMessage> {
    match doc.as_raw()?.iter().next() {
        Some(first) => {
            let (key, _) = first?;
            Ok(Some(key.to_string()))
        }
        None => Ok(None),
    }
}

/// Whether `name` is one of the connection handshake commands
#[must_use]
pub fn is_handshake_command(name: &str) -> bool {
    HANDSHAKE_COMMANDS
        .iter()
        .any(|known| name.eq_ignore_ascii_case(known))
}

/// Whether a legacy namespace addresses the command pseudo-collection (`<db>.$cmd`)
#[must_use]
pub fn namespace_is_command(namespace: &str) -> bool {
    namespace.ends_with(".$cmd")
}
