//! Error classification for session teardown and logging

use std::io::ErrorKind;

use tracing::Level;

use crate::error::ProxyError;
use crate::pool::is_connection_error;

pub struct ErrorClassifier;

impl ErrorClassifier {
    /// The client hung up (reset, broken pipe or EOF mid-frame)
    #[must_use]
    pub fn is_client_disconnect(error: &ProxyError) -> bool {
        matches!(error, ProxyError::ClientIo(e) if is_connection_error(e))
    }

    /// Whether the client can still be sent an error reply
    #[must_use]
    pub fn should_skip_client_error_response(error: &ProxyError) -> bool {
        matches!(error, ProxyError::ClientIo(_))
    }

    /// Level at which a session-ending error is logged
    #[must_use]
    pub fn log_level(error: &ProxyError) -> Level {
        match error {
            _ if Self::is_client_disconnect(error) => Level::DEBUG,
            ProxyError::ShuttingDown => Level::DEBUG,
            ProxyError::ClientIo(e) if e.kind() == ErrorKind::TimedOut => Level::DEBUG,
            ProxyError::InterceptorSetup(_) => Level::ERROR,
            _ => Level::WARN,
        }
    }
}
