//! Discarding broken pooled connections
//!
//! A pooled connection that saw any I/O failure is taken out of the pool
//! instead of being returned, so it can never be handed to another session.

use std::io::ErrorKind;

use deadpool::managed::Object;

use super::manager::BackendManager;

/// Error kinds that mean the peer is gone rather than slow
#[inline]
#[must_use]
pub fn is_connection_error(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof
    )
}

/// Take a connection out of the pool permanently and close it
#[inline]
pub fn remove_from_pool(conn: Object<BackendManager>) {
    drop(Object::take(conn));
}
