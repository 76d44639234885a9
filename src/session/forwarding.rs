//! One backend round trip
//!
//! Check out a pooled connection, write the request, read and validate the
//! reply, and give the connection back. Any failure discards the
//! connection; the caller decides whether to retry.

use std::future::Future;
use std::io;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::debug;

use super::ProxySession;
use super::state::SessionState;
use crate::error::ProxyError;
use crate::pool::PooledConnection;
use crate::protocol::{FrameError, MalformedMessage, Message, parse_frame, read_frame};
use crate::stream::{AsyncStream, ConnectionStream};

/// Run `fut` unless shutdown is signalled first
pub(super) async fn until_shutdown<T>(
    shutdown: &mut watch::Receiver<bool>,
    fut: impl Future<Output = Result<T, ProxyError>>,
) -> Result<T, ProxyError> {
    tokio::select! {
        biased;
        _ = shutdown.wait_for(|stop| *stop) => Err(ProxyError::ShuttingDown),
        result = fut => result,
    }
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{what} timed out"))
}

async fn write_request(
    conn: &mut ConnectionStream,
    payload: &[u8],
    limit: Duration,
    backend: &str,
) -> Result<(), ProxyError> {
    let write = async {
        conn.write_all(payload).await?;
        conn.flush().await
    };
    let source = match tokio::time::timeout(limit, write).await {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => e,
        Err(_) => timed_out("backend write"),
    };
    Err(ProxyError::BackendIo {
        backend: backend.to_string(),
        source,
    })
}

async fn read_reply(
    conn: &mut ConnectionStream,
    limit: Duration,
    max_message_size: usize,
    backend: &str,
) -> Result<Bytes, ProxyError> {
    let backend = backend.to_string();
    match tokio::time::timeout(limit, read_frame(conn, max_message_size)).await {
        Ok(Ok(frame)) => Ok(frame),
        Ok(Err(FrameError::Io(source))) => Err(ProxyError::BackendIo { backend, source }),
        Ok(Err(FrameError::Malformed(source))) => {
            Err(ProxyError::BackendProtocol { backend, source })
        }
        Err(_) => Err(ProxyError::BackendIo {
            backend,
            source: timed_out("backend reply"),
        }),
    }
}

/// A backend reply must use a reply opcode and answer our request
///
/// A request id of zero is legal, so an OP_MSG reply is judged on
/// `responseTo` alone.
pub(super) fn validate_reply(reply: &Message, request_id: i32) -> Result<(), MalformedMessage> {
    if !reply.can_be_reply() {
        return Err(MalformedMessage::NotAReply(reply.op_code()));
    }
    let actual = reply.header().response_to;
    if actual != request_id {
        return Err(MalformedMessage::ResponseToMismatch {
            expected: request_id,
            actual,
        });
    }
    Ok(())
}

impl<S: AsyncStream> ProxySession<S> {
    /// Forward `payload` over one pooled connection
    ///
    /// Returns `Ok(None)` when the request expects no reply.
    pub(super) async fn forward_once(
        &mut self,
        payload: &[u8],
        request_id: i32,
        expects_reply: bool,
    ) -> Result<Option<Message>, ProxyError> {
        self.transition(SessionState::AwaitingBackendConnection);
        let mut conn = until_shutdown(&mut self.shutdown, self.pool.acquire(&self.target)).await?;

        self.transition(SessionState::Forwarding);
        let result = self
            .exchange(&mut conn, payload, request_id, expects_reply)
            .await;
        if let Err(e) = &result {
            debug!(
                session = %self.info.id,
                backend = %self.target,
                error = %e,
                "Backend exchange failed, discarding connection"
            );
        }
        self.pool.release(conn, result.is_ok());
        result
    }

    async fn exchange(
        &mut self,
        conn: &mut PooledConnection,
        payload: &[u8],
        request_id: i32,
        expects_reply: bool,
    ) -> Result<Option<Message>, ProxyError> {
        let backend = self.target.to_string();
        let io_timeout = self.settings.backend_io_timeout;

        until_shutdown(
            &mut self.shutdown,
            write_request(conn, payload, io_timeout, &backend),
        )
        .await?;
        if !expects_reply {
            return Ok(None);
        }

        self.transition(SessionState::AwaitingBackendReply);
        let frame = until_shutdown(
            &mut self.shutdown,
            read_reply(conn, io_timeout, self.settings.max_message_size, &backend),
        )
        .await?;

        let reply = parse_frame(frame).map_err(|source| ProxyError::BackendProtocol {
            backend: backend.clone(),
            source,
        })?;
        validate_reply(&reply, request_id)
            .map_err(|source| ProxyError::BackendProtocol { backend, source })?;
        Ok(Some(reply))
    }
}
