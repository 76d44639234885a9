//! Session state machine
//!
//! ```text
//! Idle -> AwaitingClientMessage -> Intercepting -> AwaitingBackendConnection
//!      -> Forwarding -> AwaitingBackendReply -> InterceptingReply
//!      -> RespondingToClient -> AwaitingClientMessage ...
//! ```
//!
//! `Closing` is reachable from every state. A short-circuited request goes
//! straight from `Intercepting` to `RespondingToClient`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    AwaitingClientMessage,
    Intercepting,
    AwaitingBackendConnection,
    Forwarding,
    AwaitingBackendReply,
    InterceptingReply,
    RespondingToClient,
    Closing,
}

impl SessionState {
    /// Whether `next` may follow `self`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (_, Closing)
                // a request cycle may end in any state
                | (
                    Idle
                        | Intercepting
                        | AwaitingBackendConnection
                        | Forwarding
                        | AwaitingBackendReply
                        | InterceptingReply
                        | RespondingToClient,
                    AwaitingClientMessage
                )
                | (AwaitingClientMessage, Intercepting)
                | (Intercepting, AwaitingBackendConnection | RespondingToClient)
                // a retry goes back for a fresh connection
                | (AwaitingBackendConnection | Forwarding | AwaitingBackendReply, AwaitingBackendConnection)
                | (AwaitingBackendConnection, Forwarding)
                | (Forwarding, AwaitingBackendReply | AwaitingClientMessage)
                | (AwaitingBackendReply, InterceptingReply)
                // error replies
                | (AwaitingBackendConnection | Forwarding | AwaitingBackendReply, RespondingToClient)
                | (InterceptingReply, RespondingToClient)
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingClientMessage => "awaiting_client_message",
            Self::Intercepting => "intercepting",
            Self::AwaitingBackendConnection => "awaiting_backend_connection",
            Self::Forwarding => "forwarding",
            Self::AwaitingBackendReply => "awaiting_backend_reply",
            Self::InterceptingReply => "intercepting_reply",
            Self::RespondingToClient => "responding_to_client",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
