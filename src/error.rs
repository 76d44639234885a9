//! Session error taxonomy
//!
//! Every failure inside a proxy session is classified here. The class decides
//! what happens next: retry against a fresh backend connection, answer the
//! client with a [`MongoError`], or tear the session down.

use thiserror::Error;

use crate::interceptor::InterceptorError;
use crate::mongo_error::{MongoError, codes};
use crate::protocol::MalformedMessage;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProxyError {
    /// A client message could not be parsed
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] MalformedMessage),

    /// No backend connection could be obtained
    #[error("backend '{backend}' unavailable: {reason}")]
    BackendUnavailable {
        backend: String,
        reason: String,
        timed_out: bool,
    },

    /// The backend connection failed mid-exchange (write, read, close or deadline)
    #[error("backend '{backend}' I/O failed: {source}")]
    BackendIo {
        backend: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend answered with something that is not a valid reply
    #[error("backend '{backend}' sent an invalid reply: {source}")]
    BackendProtocol {
        backend: String,
        #[source]
        source: MalformedMessage,
    },

    /// Reading from or writing to the client failed
    #[error("client I/O error: {0}")]
    ClientIo(#[source] std::io::Error),

    #[error("interceptor error: {0}")]
    Interceptor(#[from] InterceptorError),

    /// The interceptor factory refused the session
    #[error("interceptor setup failed: {0}")]
    InterceptorSetup(String),

    #[error("proxy is shutting down")]
    ShuttingDown,
}

impl ProxyError {
    /// Failures that are retried against a fresh backend connection
    #[must_use]
    pub const fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::BackendIo { .. } | Self::BackendProtocol { .. }
        )
    }

    /// Failures after which the session cannot continue
    #[must_use]
    pub fn is_fatal_to_session(&self) -> bool {
        match self {
            Self::ClientIo(_) | Self::InterceptorSetup(_) | Self::ShuttingDown => true,
            Self::Interceptor(e) => e.is_fatal(),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::BackendUnavailable { timed_out, .. } => *timed_out,
            Self::BackendIo { source, .. } => source.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl From<&ProxyError> for MongoError {
    fn from(err: &ProxyError) -> Self {
        match err {
            ProxyError::Interceptor(e) => e.mongo_error().clone(),
            ProxyError::MalformedMessage(_) => {
                MongoError::from_code(codes::PROTOCOL_ERROR, err.to_string())
            }
            ProxyError::ShuttingDown => {
                MongoError::from_code(codes::SHUTDOWN_IN_PROGRESS, err.to_string())
            }
            _ if err.is_timeout() => MongoError::from_code(codes::NETWORK_TIMEOUT, err.to_string()),
            ProxyError::BackendUnavailable { .. } | ProxyError::BackendIo { .. } => {
                MongoError::from_code(codes::HOST_UNREACHABLE, err.to_string())
            }
            _ => MongoError::from_code(codes::INTERNAL_ERROR, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_io(kind: std::io::ErrorKind) -> ProxyError {
        ProxyError::BackendIo {
            backend: "primary".into(),
            source: std::io::Error::new(kind, "x"),
        }
    }

    #[test]
    fn test_backend_failures_are_retryable() {
        assert!(backend_io(std::io::ErrorKind::ConnectionReset).is_backend_failure());
        assert!(
            ProxyError::BackendUnavailable {
                backend: "primary".into(),
                reason: "refused".into(),
                timed_out: false,
            }
            .is_backend_failure()
        );
        assert!(!ProxyError::ClientIo(std::io::Error::other("x")).is_backend_failure());
    }

    #[test]
    fn test_fatality() {
        assert!(ProxyError::ClientIo(std::io::Error::other("x")).is_fatal_to_session());
        assert!(!ProxyError::MalformedMessage(MalformedMessage::UnknownOpCode(1)).is_fatal_to_session());
        assert!(!backend_io(std::io::ErrorKind::UnexpectedEof).is_fatal_to_session());

        let soft = InterceptorError::new(MongoError::new("no", 13, "Unauthorized"));
        assert!(!ProxyError::Interceptor(soft.clone()).is_fatal_to_session());
        assert!(ProxyError::Interceptor(soft.into_fatal()).is_fatal_to_session());
    }

    #[test]
    fn test_mongo_error_mapping() {
        let err: MongoError = (&backend_io(std::io::ErrorKind::ConnectionReset)).into();
        assert_eq!(err.code(), 6);
        assert_eq!(err.code_name(), "HostUnreachable");

        let err: MongoError = (&backend_io(std::io::ErrorKind::TimedOut)).into();
        assert_eq!(err.code_name(), "NetworkTimeout");

        let err: MongoError =
            (&ProxyError::MalformedMessage(MalformedMessage::UnknownOpCode(5))).into();
        assert_eq!(err.code(), 17);

        let custom = MongoError::new("nope", 13, "Unauthorized");
        let err: MongoError =
            (&ProxyError::Interceptor(InterceptorError::new(custom.clone()))).into();
        assert_eq!(err, custom);
    }
}
