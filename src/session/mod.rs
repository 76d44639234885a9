//! Proxy session: one client connection's lifetime
//!
//! A [`ProxySession`] reads one framed message at a time from its client,
//! passes it through the session's interceptor, forwards it over a pooled
//! backend connection and writes the reply back. Request N+1 is not read
//! until request N's reply has been written.
//!
//! # Failure handling
//!
//! - Backend failures (connect, write, read, close, deadline, bad reply) are
//!   retried on a fresh connection, `backend_retries` times. If every attempt
//!   fails the client gets a [`MongoError`] reply and the session continues,
//!   unless `close_client_on_backend_failure` is set.
//! - A malformed request of a kind that expects a reply is answered with a
//!   `ProtocolError`; a malformed fire-and-forget message is dropped. An
//!   unknown opcode or unframeable input ends the session.
//! - Interceptor errors fail the current request with their own
//!   [`MongoError`]; fatal ones also end the session.
//! - Client I/O failures end the session without a reply.
//!
//! The interceptor's `close()` runs exactly once however the session ends,
//! including when the session task is dropped mid-flight.

mod error_classification;
mod forwarding;
pub(crate) mod retry;
mod state;

pub use error_classification::ErrorClassifier;
pub use state::SessionState;

use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{Level, debug, event, info, trace, warn};

use crate::constants::{retry as retry_defaults, timeout, wire};
use crate::error::ProxyError;
use crate::interceptor::{Interception, ProxyInterceptor, SessionInfo};
use crate::mongo_error::{MongoError, codes};
use crate::pool::{BackendTarget, ConnectionPool};
use crate::protocol::{
    FrameError, FramedStream, MalformedMessage, Message, MessageHeader, OpCode, error_reply,
    msg_flags, parse_frame,
};
use crate::stream::{AsyncStream, ConnectionStream};
use retry::retry_backend;

/// Per-session limits and failure policy
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Extra attempts after a backend failure
    pub backend_retries: u32,
    /// End the session when a request still fails after all retries
    pub close_client_on_backend_failure: bool,
    pub max_message_size: usize,
    pub backend_io_timeout: Duration,
    pub client_write_timeout: Duration,
    /// Close clients that send nothing for this long
    pub client_idle_timeout: Option<Duration>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            backend_retries: retry_defaults::DEFAULT_BACKEND_RETRIES,
            close_client_on_backend_failure: false,
            max_message_size: wire::MAX_MESSAGE_SIZE,
            backend_io_timeout: timeout::BACKEND_IO,
            client_write_timeout: timeout::CLIENT_WRITE,
            client_idle_timeout: None,
        }
    }
}

/// How a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    ClientClosed,
    IdleTimeout,
    Shutdown,
}

/// Calls `close()` on the interceptor exactly once, at the latest on drop
struct InterceptorGuard {
    inner: Box<dyn ProxyInterceptor>,
    closed: bool,
}

impl InterceptorGuard {
    fn new(inner: Box<dyn ProxyInterceptor>) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.close();
        }
    }
}

impl Deref for InterceptorGuard {
    type Target = dyn ProxyInterceptor;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for InterceptorGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for InterceptorGuard {
    fn drop(&mut self) {
        self.close();
    }
}

enum ClientEvent {
    Frame(Bytes),
    Probe,
    Closed,
    IdleTimeout,
    Shutdown,
    Failed(FrameError),
}

async fn read_client<S: AsyncStream>(
    client: &mut FramedStream<S>,
    deadline: Option<Instant>,
) -> ClientEvent {
    let result = match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, client.read_frame()).await {
            Ok(result) => result,
            Err(_) => return ClientEvent::IdleTimeout,
        },
        None => client.read_frame().await,
    };
    match result {
        Ok(Some(frame)) => ClientEvent::Frame(frame),
        Ok(None) => ClientEvent::Closed,
        Err(e) => ClientEvent::Failed(e),
    }
}

async fn next_probe(probe: &mut Option<Interval>) {
    match probe {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// OP_MSG with `moreToCome` set, judged from raw bytes
fn raw_more_to_come(op_code: OpCode, frame: &[u8]) -> bool {
    op_code == OpCode::Msg
        && frame.len() >= wire::HEADER_LEN + 4
        && u32::from_le_bytes([frame[16], frame[17], frame[18], frame[19]])
            & msg_flags::MORE_TO_COME
            != 0
}

pub struct ProxySession<S = ConnectionStream> {
    info: SessionInfo,
    client: FramedStream<S>,
    pool: Arc<ConnectionPool>,
    target: BackendTarget,
    interceptor: InterceptorGuard,
    settings: SessionSettings,
    shutdown: watch::Receiver<bool>,
    state: SessionState,
}

impl<S: AsyncStream> ProxySession<S> {
    pub fn new(
        info: SessionInfo,
        client: S,
        pool: Arc<ConnectionPool>,
        target: BackendTarget,
        interceptor: Box<dyn ProxyInterceptor>,
        settings: SessionSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            info,
            client: FramedStream::new(client, settings.max_message_size),
            pool,
            target,
            interceptor: InterceptorGuard::new(interceptor),
            settings,
            shutdown,
            state: SessionState::Idle,
        }
    }

    #[must_use]
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve the client until it disconnects, fails, or shutdown is signalled
    pub async fn run(mut self) -> Result<SessionEnd, ProxyError> {
        info!(
            session = %self.info.id,
            client = %self.info.client_addr,
            backend = %self.target,
            "Session started"
        );

        let result = self.serve().await;
        self.transition(SessionState::Closing);
        self.interceptor.close();

        match &result {
            Ok(end) => info!(session = %self.info.id, ?end, "Session ended"),
            Err(e) => {
                let level = ErrorClassifier::log_level(e);
                if level == Level::ERROR {
                    event!(Level::ERROR, session = %self.info.id, error = %e, "Session failed");
                } else if level == Level::WARN {
                    event!(Level::WARN, session = %self.info.id, error = %e, "Session failed");
                } else {
                    event!(Level::DEBUG, session = %self.info.id, error = %e, "Session ended by error");
                }
            }
        }
        result
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid session transition {} -> {}",
            self.state,
            next
        );
        trace!(session = %self.info.id, from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    async fn serve(&mut self) -> Result<SessionEnd, ProxyError> {
        let interval = self.interceptor.check_connection_interval();
        let mut probe = (!interval.is_zero()).then(|| {
            let mut probe = tokio::time::interval_at(Instant::now() + interval, interval);
            probe.set_missed_tick_behavior(MissedTickBehavior::Delay);
            probe
        });

        loop {
            self.transition(SessionState::AwaitingClientMessage);
            let deadline = self.settings.client_idle_timeout.map(|idle| Instant::now() + idle);

            let event = loop {
                let event = tokio::select! {
                    biased;
                    _ = self.shutdown.wait_for(|stop| *stop) => ClientEvent::Shutdown,
                    () = next_probe(&mut probe) => ClientEvent::Probe,
                    event = read_client(&mut self.client, deadline) => event,
                };
                match event {
                    ClientEvent::Probe => self.probe_backend().await?,
                    other => break other,
                }
            };

            match event {
                ClientEvent::Frame(frame) => self.handle_frame(frame).await?,
                ClientEvent::Closed => return Ok(SessionEnd::ClientClosed),
                ClientEvent::IdleTimeout => return Ok(SessionEnd::IdleTimeout),
                ClientEvent::Shutdown => return Ok(SessionEnd::Shutdown),
                ClientEvent::Failed(FrameError::Io(e)) => return Err(ProxyError::ClientIo(e)),
                ClientEvent::Failed(FrameError::Malformed(e)) => {
                    return Err(ProxyError::MalformedMessage(e));
                }
                ClientEvent::Probe => {}
            }
        }
    }

    /// Run the interceptor's backend probe; a failure drops idle connections
    async fn probe_backend(&mut self) -> Result<(), ProxyError> {
        let Err(e) = self.interceptor.check_connection().await else {
            return Ok(());
        };
        let cleared = self.pool.clear_idle_connections(&self.target);
        warn!(
            session = %self.info.id,
            backend = %self.target,
            error = %e,
            cleared,
            "Backend health probe failed"
        );
        if e.is_fatal() { Err(e.into()) } else { Ok(()) }
    }

    /// One full request cycle. An `Err` ends the session.
    async fn handle_frame(&mut self, frame: Bytes) -> Result<(), ProxyError> {
        self.transition(SessionState::Intercepting);
        let message = match parse_frame(frame.clone()) {
            Ok(message) => message,
            Err(e) => return self.reject_malformed(&frame, e).await,
        };

        let request = *message.header();
        self.interceptor.track_request(&request);
        let expects_reply = message.has_response();

        match self.process(message).await {
            Ok(()) => Ok(()),
            Err(e) => self.fail_request(&request, expects_reply, e).await,
        }
    }

    async fn process(&mut self, message: Message) -> Result<(), ProxyError> {
        match self.interceptor.intercept_client_to_backend(message)? {
            Interception::ShortCircuit {
                request,
                mut response,
            } => {
                let mut reply = response.synthesize_reply(&request)?;
                if !request.has_response() {
                    return Ok(());
                }
                reply.header_mut().response_to = request.request_id();
                self.respond(reply).await
            }
            Interception::Forward {
                mut message,
                response,
            } => {
                if let Message::Msg(msg) = &mut message
                    && msg.clear_exhaust_allowed()
                {
                    debug!(session = %self.info.id, "Cleared exhaustAllowed on forwarded OP_MSG");
                }
                let request_id = message.request_id();
                let expects_reply = message.has_response();
                let payload = message.serialize();

                let reply = retry_backend!(
                    self.settings.backend_retries,
                    self.target,
                    ProxyError::is_backend_failure,
                    self.forward_once(&payload, request_id, expects_reply).await
                )?;
                let Some(reply) = reply else {
                    return Ok(());
                };

                self.transition(SessionState::InterceptingReply);
                let mut reply = match response {
                    Some(mut hook) => hook.intercept_backend_to_client(reply)?,
                    None => reply,
                };
                reply.header_mut().response_to = request_id;
                self.respond(reply).await
            }
        }
    }

    /// Turn a failed request into an error reply, or end the session
    async fn fail_request(
        &mut self,
        request: &MessageHeader,
        expects_reply: bool,
        err: ProxyError,
    ) -> Result<(), ProxyError> {
        if ErrorClassifier::should_skip_client_error_response(&err) {
            return Err(err);
        }
        let end_session = err.is_fatal_to_session()
            || (err.is_backend_failure() && self.settings.close_client_on_backend_failure);

        warn!(
            session = %self.info.id,
            request_id = request.request_id,
            op = %request.op_code,
            error = %err,
            "Request failed"
        );
        if expects_reply {
            self.send_error(request, &MongoError::from(&err)).await?;
        }
        if end_session { Err(err) } else { Ok(()) }
    }

    async fn reject_malformed(
        &mut self,
        frame: &[u8],
        err: MalformedMessage,
    ) -> Result<(), ProxyError> {
        let Some(Ok(header)) = MessageHeader::peek(frame).map(|raw| raw.validate()) else {
            warn!(session = %self.info.id, error = %err, "Unparseable message, closing session");
            return Err(err.into());
        };

        self.interceptor.track_request(&header);
        warn!(
            session = %self.info.id,
            request_id = header.request_id,
            op = %header.op_code,
            error = %err,
            "Malformed message"
        );
        if header.op_code.expects_reply() && !raw_more_to_come(header.op_code, frame) {
            let error = MongoError::from_code(codes::PROTOCOL_ERROR, err.to_string());
            self.send_error(&header, &error).await?;
        }
        Ok(())
    }

    async fn send_error(
        &mut self,
        request: &MessageHeader,
        error: &MongoError,
    ) -> Result<(), ProxyError> {
        match error_reply(request, error)? {
            Some(reply) => self.respond(reply).await,
            None => Ok(()),
        }
    }

    async fn respond(&mut self, mut reply: Message) -> Result<(), ProxyError> {
        self.transition(SessionState::RespondingToClient);
        let bytes = reply.serialize();
        self.interceptor.track_response(reply.header());

        let limit = self.settings.client_write_timeout;
        match tokio::time::timeout(limit, self.client.write_frame(&bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProxyError::ClientIo(e)),
            Err(_) => Err(ProxyError::ClientIo(io::Error::new(
                io::ErrorKind::TimedOut,
                "client write timed out",
            ))),
        }
    }
}
