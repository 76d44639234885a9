//! Handshake field stripping
//!
//! Removes configured first-level fields (typically `client`, the driver
//! identity block) from the connection handshake command before it reaches
//! the backend. Handshakes arrive as `isMaster`/`hello` on a legacy
//! `<db>.$cmd` query, as an OP_MSG body, or as an OP_COMMAND.
//!
//! A command document that does not decode is forwarded untouched; the
//! backend reports the error.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use super::{Interception, InterceptorError, InterceptorFactory, ProxyInterceptor, SessionInfo};
use crate::protocol::document::without_index;
use crate::protocol::{
    MalformedMessage, Message, SimpleBson, command_name, index_of_key, is_handshake_command,
    namespace_is_command,
};

fn undecodable(session: Uuid, err: &MalformedMessage) {
    debug!(session = %session, error = %err, "Command document did not decode, forwarding as is");
}

/// Creates a [`StripFieldsInterceptor`] per session sharing one field list
#[derive(Debug, Clone)]
pub struct StripFieldsFactory {
    fields: Arc<[String]>,
}

impl StripFieldsFactory {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::<String>::into).collect(),
        }
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

impl InterceptorFactory for StripFieldsFactory {
    fn new_interceptor(&self, session: &SessionInfo) -> anyhow::Result<Box<dyn ProxyInterceptor>> {
        Ok(Box::new(StripFieldsInterceptor {
            fields: Arc::clone(&self.fields),
            session_id: session.id,
        }))
    }
}

#[derive(Debug)]
pub struct StripFieldsInterceptor {
    fields: Arc<[String]>,
    session_id: Uuid,
}

impl StripFieldsInterceptor {
    /// Rebuild `doc` without the configured fields, `None` if nothing matched
    fn strip(&self, doc: &SimpleBson) -> Option<SimpleBson> {
        match self.try_strip(doc) {
            Ok(stripped) => stripped,
            Err(e) => {
                undecodable(self.session_id, &e);
                None
            }
        }
    }

    fn try_strip(&self, doc: &SimpleBson) -> Result<Option<SimpleBson>, MalformedMessage> {
        let mut decoded = doc.to_document()?;
        let mut removed = 0usize;
        for field in self.fields.iter() {
            if let Some(index) = index_of_key(&decoded, field) {
                decoded = without_index(decoded, index);
                removed += 1;
            }
        }
        if removed == 0 {
            return Ok(None);
        }
        debug!(
            session = %self.session_id,
            removed,
            "Stripped fields from handshake"
        );
        SimpleBson::from_document(&decoded).map(Some)
    }

    fn is_handshake(&self, doc: &SimpleBson) -> bool {
        match command_name(doc) {
            Ok(name) => name.is_some_and(|name| is_handshake_command(&name)),
            Err(e) => {
                undecodable(self.session_id, &e);
                false
            }
        }
    }
}

impl ProxyInterceptor for StripFieldsInterceptor {
    fn intercept_client_to_backend(
        &mut self,
        mut message: Message,
    ) -> Result<Interception, InterceptorError> {
        match &mut message {
            Message::Query(query)
                if namespace_is_command(&query.namespace) && self.is_handshake(&query.query) =>
            {
                if let Some(stripped) = self.strip(&query.query) {
                    query.query = stripped;
                }
            }
            Message::Msg(msg) => {
                let rewritten = match msg.body() {
                    Some(body) if self.is_handshake(body) => self.strip(body),
                    _ => None,
                };
                if let Some(body) = rewritten {
                    msg.set_body(body);
                }
            }
            Message::Command(command) if is_handshake_command(&command.command_name) => {
                if let Some(stripped) = self.strip(&command.command_args) {
                    command.command_args = stripped;
                }
            }
            _ => {}
        }
        Ok(Interception::forward(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        CommandMessage, MessageHeader, MsgMessage, MsgSection, OpCode, QueryMessage, msg_flags,
    };
    use bson::{Document, doc};
    use bytes::Bytes;

    /// Well-framed document whose only element has type byte 0x42
    fn undecodable_document() -> SimpleBson {
        SimpleBson::from_bytes(Bytes::from_static(&[8, 0, 0, 0, 0x42, b'a', 0, 0])).unwrap()
    }

    fn interceptor() -> Box<dyn ProxyInterceptor> {
        let session = SessionInfo {
            id: Uuid::new_v4(),
            client_addr: "127.0.0.1:40000".parse().unwrap(),
            proxy_name: Arc::from("test"),
        };
        StripFieldsFactory::new(["client"])
            .new_interceptor(&session)
            .unwrap()
    }

    fn query(namespace: &str, body: Document) -> Message {
        Message::Query(QueryMessage {
            header: MessageHeader::new(OpCode::Query, 1, 0),
            flags: 0,
            namespace: namespace.to_string(),
            skip: 0,
            limit: -1,
            query: SimpleBson::from_document(&body).unwrap(),
            projection: None,
        })
    }

    fn forwarded(interception: Interception) -> Message {
        match interception {
            Interception::Forward { message, .. } => message,
            other => panic!("expected forward, got {other:?}"),
        }
    }

    #[test]
    fn test_strips_client_from_legacy_handshake() {
        let msg = query(
            "admin.$cmd",
            doc! { "isMaster": 1, "client": { "driver": { "name": "rust" } }, "compression": [] },
        );
        let out = forwarded(interceptor().intercept_client_to_backend(msg).unwrap());
        let Message::Query(q) = out else {
            panic!("expected query")
        };
        let body = q.query.to_document().unwrap();
        assert!(!body.contains_key("client"));
        assert_eq!(
            body.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["isMaster", "compression"]
        );
    }

    #[test]
    fn test_leaves_non_handshake_alone() {
        let original = query("test.$cmd", doc! { "find": "users", "client": 1 });
        let out = forwarded(
            interceptor()
                .intercept_client_to_backend(original.clone())
                .unwrap(),
        );
        assert_eq!(out, original);
    }

    #[test]
    fn test_leaves_regular_collection_query_alone() {
        let original = query("test.users", doc! { "isMaster": 1, "client": 1 });
        let out = forwarded(
            interceptor()
                .intercept_client_to_backend(original.clone())
                .unwrap(),
        );
        assert_eq!(out, original);
    }

    #[test]
    fn test_strips_client_from_hello_msg_and_drops_checksum() {
        let body = doc! { "hello": 1, "client": { "application": { "name": "x" } }, "$db": "admin" };
        let msg = Message::Msg(MsgMessage {
            header: MessageHeader::new(OpCode::Msg, 3, 0),
            flags: msg_flags::CHECKSUM_PRESENT,
            sections: vec![MsgSection::Body(SimpleBson::from_document(&body).unwrap())],
            checksum: Some(0xDEAD_BEEF),
        });
        let Message::Msg(out) = forwarded(interceptor().intercept_client_to_backend(msg).unwrap())
        else {
            panic!("expected msg")
        };
        let decoded = out.body().unwrap().to_document().unwrap();
        assert!(!decoded.contains_key("client"));
        assert_eq!(decoded.get_str("$db").unwrap(), "admin");
        assert!(out.checksum.is_none());
        assert_eq!(out.flags & msg_flags::CHECKSUM_PRESENT, 0);
    }

    #[test]
    fn test_handshake_without_field_is_untouched() {
        let original = query("admin.$cmd", doc! { "ismaster": 1 });
        let out = forwarded(
            interceptor()
                .intercept_client_to_backend(original.clone())
                .unwrap(),
        );
        assert_eq!(out, original);
    }

    #[test]
    fn test_field_match_is_case_sensitive() {
        let original = query("admin.$cmd", doc! { "isMaster": 1, "Client": 1 });
        let out = forwarded(
            interceptor()
                .intercept_client_to_backend(original.clone())
                .unwrap(),
        );
        assert_eq!(out, original);
    }

    #[test]
    fn test_undecodable_msg_body_is_forwarded() {
        let original = Message::Msg(MsgMessage {
            header: MessageHeader::new(OpCode::Msg, 4, 0),
            flags: 0,
            sections: vec![MsgSection::Body(undecodable_document())],
            checksum: None,
        });
        let out = forwarded(
            interceptor()
                .intercept_client_to_backend(original.clone())
                .unwrap(),
        );
        assert_eq!(out, original);
    }

    #[test]
    fn test_undecodable_handshake_args_are_forwarded() {
        let original = Message::Command(CommandMessage {
            header: MessageHeader::new(OpCode::Command, 5, 0),
            database: "admin".to_string(),
            command_name: "isMaster".to_string(),
            command_args: undecodable_document(),
            metadata: SimpleBson::empty(),
            input_docs: Vec::new(),
        });
        let out = forwarded(
            interceptor()
                .intercept_client_to_backend(original.clone())
                .unwrap(),
        );
        assert_eq!(out, original);
    }
}
