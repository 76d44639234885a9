//! Pluggable traffic interception
//!
//! A [`InterceptorFactory`] is asked once per accepted client for a
//! [`ProxyInterceptor`]. The session then routes every client message through
//! it before forwarding, reports request/response headers to it, probes the
//! backend on its cadence, and closes it exactly once when the session ends.
//!
//! # Short-circuiting
//!
//! An interceptor can answer a request without contacting the backend by
//! returning [`Interception::ShortCircuit`] with a [`ResponseInterceptor`]
//! whose [`synthesize_reply`](ResponseInterceptor::synthesize_reply)
//! produces the reply.

mod strip_fields;

pub use strip_fields::{StripFieldsFactory, StripFieldsInterceptor};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::mongo_error::{MongoError, codes};
use crate::protocol::{MalformedMessage, Message, MessageHeader};

/// What an interceptor knows about the session it serves
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: Uuid,
    pub client_addr: SocketAddr,
    pub proxy_name: Arc<str>,
}

/// Creates one interceptor per client connection
///
/// A failure aborts the session before any traffic is proxied.
pub trait InterceptorFactory: Send + Sync + 'static {
    fn new_interceptor(&self, session: &SessionInfo) -> anyhow::Result<Box<dyn ProxyInterceptor>>;
}

/// Per-session interception hooks
#[async_trait]
pub trait ProxyInterceptor: Send {
    /// Inspect or rewrite a client message before it is forwarded
    fn intercept_client_to_backend(
        &mut self,
        message: Message,
    ) -> Result<Interception, InterceptorError>;

    /// Called for every client request read by the session. Must not block.
    fn track_request(&mut self, _header: &MessageHeader) {}

    /// Called for every reply written back to the client. Must not block.
    fn track_response(&mut self, _header: &MessageHeader) {}

    /// Backend health probe; an error marks the backend unhealthy
    async fn check_connection(&mut self) -> Result<(), InterceptorError> {
        Ok(())
    }

    /// Probe cadence, `Duration::ZERO` disables probing
    fn check_connection_interval(&self) -> Duration {
        Duration::ZERO
    }

    /// Invoked exactly once when the session ends
    fn close(&mut self) {}
}

/// Reply-side hooks for a single request
pub trait ResponseInterceptor: Send {
    /// Produce a reply to `request` without contacting the backend
    fn synthesize_reply(&mut self, request: &Message) -> Result<Message, InterceptorError> {
        Err(InterceptorError::new(MongoError::from_code(
            codes::COMMAND_FAILED,
            format!("no synthesized reply for {}", request.op_code()),
        )))
    }

    /// Inspect or rewrite a backend reply before it reaches the client
    fn intercept_backend_to_client(&mut self, reply: Message) -> Result<Message, InterceptorError> {
        Ok(reply)
    }
}

/// Outcome of [`ProxyInterceptor::intercept_client_to_backend`]
pub enum Interception {
    /// Send `message` to the backend, optionally hooking its reply
    Forward {
        message: Message,
        response: Option<Box<dyn ResponseInterceptor>>,
    },
    /// Answer locally; the backend is never contacted
    ShortCircuit {
        request: Message,
        response: Box<dyn ResponseInterceptor>,
    },
}

impl Interception {
    #[must_use]
    pub fn forward(message: Message) -> Self {
        Self::Forward {
            message,
            response: None,
        }
    }
}

impl std::fmt::Debug for Interception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forward { message, response } => f
                .debug_struct("Forward")
                .field("op_code", &message.op_code())
                .field("hooks_reply", &response.is_some())
                .finish(),
            Self::ShortCircuit { request, .. } => f
                .debug_struct("ShortCircuit")
                .field("op_code", &request.op_code())
                .finish(),
        }
    }
}

/// Error raised by interceptor logic
///
/// The carried [`MongoError`] is sent to the client. A fatal error also
/// ends the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error}")]
pub struct InterceptorError {
    error: MongoError,
    fatal: bool,
}

impl InterceptorError {
    /// A recoverable error: the current request fails, the session continues
    #[must_use]
    pub const fn new(error: MongoError) -> Self {
        Self {
            error,
            fatal: false,
        }
    }

    #[must_use]
    pub const fn fatal(error: MongoError) -> Self {
        Self { error, fatal: true }
    }

    #[must_use]
    pub fn into_fatal(self) -> Self {
        Self {
            fatal: true,
            ..self
        }
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.fatal
    }

    #[must_use]
    pub const fn mongo_error(&self) -> &MongoError {
        &self.error
    }
}

impl From<MalformedMessage> for InterceptorError {
    fn from(err: MalformedMessage) -> Self {
        Self::new(MongoError::from_code(codes::PROTOCOL_ERROR, err.to_string()))
    }
}

/// Forwards everything unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughInterceptor;

impl ProxyInterceptor for PassThroughInterceptor {
    fn intercept_client_to_backend(
        &mut self,
        message: Message,
    ) -> Result<Interception, InterceptorError> {
        Ok(Interception::forward(message))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughFactory;

impl InterceptorFactory for PassThroughFactory {
    fn new_interceptor(&self, _session: &SessionInfo) -> anyhow::Result<Box<dyn ProxyInterceptor>> {
        Ok(Box::new(PassThroughInterceptor))
    }
}
