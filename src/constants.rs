//! Constants used throughout the proxy
//!
//! Wire-format sizes, socket tuning and default timeouts live here so the
//! codec, pool and session agree on a single set of numbers.

use std::time::Duration;

/// Wire-format constants
pub mod wire {
    /// Length of the standard message header (size, requestID, responseTo, opCode)
    pub const HEADER_LEN: usize = 16;

    /// Smallest valid embedded document: int32 length + terminating NUL
    pub const MIN_DOCUMENT_LEN: usize = 5;

    /// Largest message the server accepts (maxMessageSizeBytes)
    pub const MAX_MESSAGE_SIZE: usize = 48_000_000;

    /// Length of the optional CRC-32C trailer on OP_MSG
    pub const CHECKSUM_LEN: usize = 4;
}

/// Buffer size constants
pub mod buffer {
    /// Initial capacity of the per-connection frame buffer (16KB)
    ///
    /// Most commands and replies fit; larger frames grow the buffer on demand.
    pub const FRAME_INITIAL: usize = 16 * 1024;
}

/// Socket buffer size constants
pub mod socket {
    /// Receive buffer for pooled backend sockets (1MB)
    pub const POOL_RECV_BUFFER: u32 = 1024 * 1024;

    /// Send buffer for pooled backend sockets (1MB)
    pub const POOL_SEND_BUFFER: u32 = 1024 * 1024;

    /// Idle time before the first TCP keepalive probe
    pub const KEEPALIVE_TIME: std::time::Duration = std::time::Duration::from_secs(60);

    /// Interval between TCP keepalive probes
    pub const KEEPALIVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);
}

/// Timeout constants
pub mod timeout {
    use super::Duration;

    /// Backend TCP connect (and TLS handshake) deadline
    pub const CONNECT: Duration = Duration::from_secs(10);

    /// Deadline for a single backend write or reply read
    pub const BACKEND_IO: Duration = Duration::from_secs(30);

    /// Deadline for writing a reply back to the client
    pub const CLIENT_WRITE: Duration = Duration::from_secs(30);

    /// Deadline for a client's TLS handshake
    pub const CLIENT_HANDSHAKE: Duration = Duration::from_secs(10);

    /// How long a session waits for a free pooled connection
    pub const POOL_WAIT: Duration = Duration::from_secs(5);

    /// How long graceful shutdown waits for sessions to close
    pub const SHUTDOWN_DRAIN: Duration = Duration::from_secs(10);

    /// Poll interval while draining sessions
    pub const SHUTDOWN_POLL: Duration = Duration::from_millis(10);
}

/// Connection pool constants
pub mod pool {
    /// Default maximum connections per backend target
    pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

    /// Size of the non-blocking peek buffer used by liveness checks
    pub const TCP_PEEK_BUFFER_SIZE: usize = 1;

    /// Recommended minimum interval between idle-connection sweeps
    pub const MIN_RECOMMENDED_HEALTH_CHECK_SECS: u64 = 5;
}

/// Retry constants
pub mod retry {
    /// Lower bound of the jittered pause before a retry
    pub const JITTER_BASE_MS: u64 = 10;

    /// Width of the jitter window added to [`JITTER_BASE_MS`]
    pub const JITTER_SPREAD_MS: u64 = 50;

    /// Default number of extra attempts after a backend failure
    pub const DEFAULT_BACKEND_RETRIES: u32 = 1;
}
