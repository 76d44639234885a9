//! Benchmarks for the wire codec hot path
//!
//! Every proxied request is framed, parsed, possibly rewritten and
//! re-serialized once in each direction:
//! - Frame parsing for OP_MSG and legacy OP_QUERY
//! - Serialization after a body rewrite
//! - Handshake field removal
//!
//! Run with: cargo bench --bench wire_codec

use bson::doc;
use bytes::Bytes;
use divan::{Bencher, black_box};
use mongo_wire_proxy::protocol::{
    Message, MessageHeader, MsgMessage, MsgSection, OpCode, QueryMessage, SimpleBson, frame_len,
    parse_frame, remove_key,
};

fn main() {
    divan::main();
}

fn handshake() -> SimpleBson {
    SimpleBson::from_document(&doc! {
        "isMaster": 1,
        "helloOk": true,
        "client": {
            "driver": { "name": "mongo-rust-driver", "version": "2.8.0" },
            "os": { "type": "linux", "architecture": "x86_64" },
            "platform": "rustc 1.85.0",
        },
        "compression": ["zstd", "snappy"],
    })
    .unwrap()
}

fn op_msg(documents: usize) -> Message {
    let mut sections = vec![MsgSection::Body(
        SimpleBson::from_document(&doc! { "insert": "events", "ordered": true, "$db": "app" })
            .unwrap(),
    )];
    if documents > 0 {
        sections.push(MsgSection::Sequence {
            identifier: "documents".into(),
            documents: (0..documents)
                .map(|i| {
                    SimpleBson::from_document(&doc! { "_id": i as i64, "payload": "x".repeat(64) })
                        .unwrap()
                })
                .collect(),
        });
    }
    Message::Msg(MsgMessage {
        header: MessageHeader::new(OpCode::Msg, 1, 0),
        flags: 0,
        sections,
        checksum: None,
    })
}

fn op_query() -> Message {
    Message::Query(QueryMessage {
        header: MessageHeader::new(OpCode::Query, 1, 0),
        flags: 0,
        namespace: "admin.$cmd".into(),
        skip: 0,
        limit: -1,
        query: handshake(),
        projection: None,
    })
}

mod parse {
    use super::*;

    #[divan::bench(args = [0, 10, 100])]
    fn op_msg_insert(bencher: Bencher, documents: usize) {
        let frame = op_msg(documents).encode();
        bencher.bench(|| parse_frame(black_box(frame.clone())).unwrap());
    }

    #[divan::bench]
    fn op_query_handshake(bencher: Bencher) {
        let frame = op_query().encode();
        bencher.bench(|| parse_frame(black_box(frame.clone())).unwrap());
    }

    #[divan::bench]
    fn frame_len_complete(bencher: Bencher) {
        let frame: Bytes = op_msg(10).encode();
        bencher.bench(|| frame_len(black_box(&frame), 48_000_000).unwrap());
    }
}

mod serialize {
    use super::*;

    #[divan::bench(args = [0, 10, 100])]
    fn op_msg_insert(bencher: Bencher, documents: usize) {
        let message = op_msg(documents);
        bencher.bench_local(|| black_box(&message).encode());
    }

    #[divan::bench]
    fn op_query_handshake(bencher: Bencher) {
        let message = op_query();
        bencher.bench_local(|| black_box(&message).encode());
    }
}

mod rewrite {
    use super::*;

    #[divan::bench]
    fn strip_client_field(bencher: Bencher) {
        let doc = handshake();
        bencher.bench(|| remove_key(black_box(&doc), "client").unwrap());
    }

    #[divan::bench]
    fn strip_absent_field(bencher: Bencher) {
        let doc = handshake();
        bencher.bench(|| remove_key(black_box(&doc), "saslSupportedMechs").unwrap());
    }
}
