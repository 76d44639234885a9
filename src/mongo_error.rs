//! Errors returned to clients as protocol data
//!
//! A [`MongoError`] is what the proxy sends back in place of a normal reply
//! when it has to fail a request but the client connection is still usable.
//! It renders to the server's error-document shape:
//! `{ ok: 0, errmsg: <cause>, code: <code>, codeName: <name>, errInfo: <info> }`.

use bson::{Document, doc};

/// Server error codes the proxy itself produces
pub mod codes {
    pub const INTERNAL_ERROR: (i32, &str) = (1, "InternalError");
    pub const BAD_VALUE: (i32, &str) = (2, "BadValue");
    pub const HOST_UNREACHABLE: (i32, &str) = (6, "HostUnreachable");
    pub const PROTOCOL_ERROR: (i32, &str) = (17, "ProtocolError");
    pub const NETWORK_TIMEOUT: (i32, &str) = (89, "NetworkTimeout");
    pub const SHUTDOWN_IN_PROGRESS: (i32, &str) = (91, "ShutdownInProgress");
    pub const COMMAND_FAILED: (i32, &str) = (125, "CommandFailed");
}

/// An error with a numeric code, a code name and optional extra info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MongoError {
    cause: Option<String>,
    code: i32,
    code_name: String,
    error_info: String,
}

impl MongoError {
    pub fn new(cause: impl Into<String>, code: i32, code_name: impl Into<String>) -> Self {
        Self {
            cause: Some(cause.into()),
            code,
            code_name: code_name.into(),
            error_info: String::new(),
        }
    }

    pub fn with_info(
        cause: impl Into<String>,
        code: i32,
        code_name: impl Into<String>,
        error_info: impl Into<String>,
    ) -> Self {
        Self {
            error_info: error_info.into(),
            ..Self::new(cause, code, code_name)
        }
    }

    /// An error without an `errmsg`
    pub fn without_cause(code: i32, code_name: impl Into<String>) -> Self {
        Self {
            cause: None,
            code,
            code_name: code_name.into(),
            error_info: String::new(),
        }
    }

    /// Build from one of the [`codes`] pairs
    pub fn from_code((code, name): (i32, &str), cause: impl Into<String>) -> Self {
        Self::new(cause, code, name)
    }

    #[must_use]
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    #[must_use]
    pub const fn code(&self) -> i32 {
        self.code
    }

    #[must_use]
    pub fn code_name(&self) -> &str {
        &self.code_name
    }

    /// Extra info; empty when none was attached
    #[must_use]
    pub fn error_info(&self) -> &str {
        &self.error_info
    }

    /// The wire error document
    ///
    /// `errmsg` is omitted without a cause and `errInfo` when it is empty.
    #[must_use]
    pub fn to_bson(&self) -> Document {
        let mut out = doc! { "ok": 0 };
        if let Some(cause) = &self.cause {
            out.insert("errmsg", cause.as_str());
        }
        out.insert("code", self.code);
        out.insert("codeName", self.code_name.as_str());
        if !self.error_info.is_empty() {
            out.insert("errInfo", self.error_info.as_str());
        }
        out
    }
}

impl std::fmt::Display for MongoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "code={} codeName={} errmsg = {}",
            self.code,
            self.code_name,
            self.cause.as_deref().unwrap_or_default()
        )
    }
}

impl std::error::Error for MongoError {}
