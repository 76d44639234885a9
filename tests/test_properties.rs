//! Property-based tests for the wire codec and document helpers

use bson::{Document, doc};
use bytes::Bytes;
use mongo_wire_proxy::protocol::{
    KillCursorsMessage, MalformedMessage, Message, MessageHeader, MsgMessage, MsgSection, OpCode,
    QueryMessage, SimpleBson, decode, index_of_key, parse_frame, remove_key,
};
use proptest::prelude::*;

fn document() -> impl Strategy<Value = Document> {
    prop::collection::vec(("[a-zA-Z_]{1,8}", any::<i32>(), "[ -~]{0,16}"), 0..6).prop_map(
        |fields| {
            let mut doc = Document::new();
            for (key, number, text) in fields {
                if number % 2 == 0 {
                    doc.insert(key, number);
                } else {
                    doc.insert(key, text);
                }
            }
            doc
        },
    )
}

fn simple(doc: &Document) -> SimpleBson {
    SimpleBson::from_document(doc).unwrap()
}

fn op_msg() -> impl Strategy<Value = Message> {
    (
        any::<i32>(),
        document(),
        prop::option::of(("[a-z]{1,10}", prop::collection::vec(document(), 0..4))),
        any::<bool>(),
    )
        .prop_map(|(request_id, body, sequence, more_to_come)| {
            let mut sections = vec![MsgSection::Body(simple(&body))];
            if let Some((identifier, docs)) = sequence {
                sections.push(MsgSection::Sequence {
                    identifier,
                    documents: docs.iter().map(simple).collect(),
                });
            }
            Message::Msg(MsgMessage {
                header: MessageHeader::new(OpCode::Msg, request_id, 0),
                flags: if more_to_come { 2 } else { 0 },
                sections,
                checksum: None,
            })
        })
}

fn op_query() -> impl Strategy<Value = Message> {
    (
        any::<i32>(),
        "[a-z]{1,8}\\.[a-z$]{1,8}",
        any::<i32>(),
        any::<i32>(),
        document(),
        prop::option::of(document()),
    )
        .prop_map(|(request_id, namespace, skip, limit, query, projection)| {
            Message::Query(QueryMessage {
                header: MessageHeader::new(OpCode::Query, request_id, 0),
                flags: 0,
                namespace,
                skip,
                limit,
                query: simple(&query),
                projection: projection.as_ref().map(simple),
            })
        })
}

fn kill_cursors() -> impl Strategy<Value = Message> {
    (any::<i32>(), prop::collection::vec(any::<i64>(), 0..8)).prop_map(|(request_id, ids)| {
        Message::KillCursors(KillCursorsMessage {
            header: MessageHeader::new(OpCode::KillCursors, request_id, 0),
            cursor_ids: ids,
        })
    })
}

fn any_message() -> impl Strategy<Value = Message> {
    prop_oneof![op_msg(), op_query(), kill_cursors()]
}

proptest! {
    #[test]
    fn prop_parse_serialize_is_identity(mut message in any_message()) {
        let bytes = message.serialize();
        prop_assert_eq!(message.header().size as usize, bytes.len());

        let parsed = parse_frame(bytes.clone()).unwrap();
        prop_assert_eq!(&parsed, &message);
        prop_assert_eq!(parsed.encode(), bytes);
    }

    #[test]
    fn prop_decode_waits_for_complete_frame(mut message in any_message(), cut in 0usize..64) {
        let bytes = message.serialize();
        let cut = cut.min(bytes.len() - 1);
        prop_assert_eq!(decode(&bytes[..cut]).unwrap(), None);
        prop_assert_eq!(decode(&bytes).unwrap(), Some(message));
    }

    #[test]
    fn prop_parse_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = parse_frame(Bytes::from(bytes.clone()));
        let _ = decode(&bytes);
    }

    #[test]
    fn prop_header_fields_survive_garbage_body(
        request_id in any::<i32>(),
        body in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let mut frame = Vec::with_capacity(16 + body.len());
        frame.extend_from_slice(&((16 + body.len()) as i32).to_le_bytes());
        frame.extend_from_slice(&request_id.to_le_bytes());
        frame.extend_from_slice(&0i32.to_le_bytes());
        frame.extend_from_slice(&OpCode::Msg.as_i32().to_le_bytes());
        frame.extend_from_slice(&body);

        let header = MessageHeader::parse(&frame).unwrap();
        prop_assert_eq!(header.request_id, request_id);
        let _ = parse_frame(Bytes::from(frame));
    }

    #[test]
    fn prop_overstated_document_size_is_malformed(extra in 1i32..10_000) {
        let doc = simple(&doc! { "ping": 1 });
        let mut raw = doc.as_bytes().to_vec();
        let lie = doc.size() + extra;
        raw[..4].copy_from_slice(&lie.to_le_bytes());

        let mut frame = Vec::new();
        frame.extend_from_slice(&((16 + 4 + 1 + raw.len()) as i32).to_le_bytes());
        frame.extend_from_slice(&1i32.to_le_bytes());
        frame.extend_from_slice(&0i32.to_le_bytes());
        frame.extend_from_slice(&OpCode::Msg.as_i32().to_le_bytes());
        frame.extend_from_slice(&0u32.to_le_bytes());
        frame.push(0);
        frame.extend_from_slice(&raw);

        let is_overrun = matches!(
            parse_frame(Bytes::from(frame)),
            Err(MalformedMessage::DocumentOverrun { .. })
        );
        prop_assert!(is_overrun);
    }

    #[test]
    fn prop_remove_key_drops_only_that_key(doc in document(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!doc.is_empty());
        let keys: Vec<String> = doc.keys().cloned().collect();
        let key = &keys[pick.index(keys.len())];

        let stripped = remove_key(&simple(&doc), key).unwrap().unwrap();
        prop_assert_eq!(stripped.size() as usize, stripped.len());

        let decoded = stripped.to_document().unwrap();
        prop_assert_eq!(index_of_key(&decoded, key), None);
        let expected: Vec<&String> = keys.iter().filter(|k| *k != key).collect();
        let actual: Vec<&String> = decoded.keys().collect();
        prop_assert_eq!(actual, expected);
    }
}
