//! Configuration validation
//!
//! Zero ports, zero pool sizes and blank hosts are already rejected by the
//! types. What is left are cross-field rules and sanity warnings.

use anyhow::{Result, bail};
use std::time::Duration;

use super::types::Config;
use crate::constants::{pool::MIN_RECOMMENDED_HEALTH_CHECK_SECS, wire};

const MIN_RECOMMENDED_HEALTH_CHECK: Duration =
    Duration::from_secs(MIN_RECOMMENDED_HEALTH_CHECK_SECS);

impl Config {
    /// Reject settings the proxy cannot run with and warn about odd ones
    pub fn validate(&self) -> Result<()> {
        if self.backend.tls_skip_verify && !self.backend.use_tls {
            bail!("backend.tls_skip_verify requires backend.use_tls");
        }
        if self.backend.tls_ca_path.is_some() && !self.backend.use_tls {
            bail!("backend.tls_ca_path requires backend.use_tls");
        }
        if self.session.max_message_size <= wire::HEADER_LEN {
            bail!(
                "session.max_message_size must exceed the {} byte header",
                wire::HEADER_LEN
            );
        }
        if self.timeouts.connect_secs.is_zero() || self.timeouts.backend_io_secs.is_zero() {
            bail!("timeouts.connect_secs and timeouts.backend_io_secs must be non-zero");
        }
        if self.timeouts.client_handshake_secs.is_zero() {
            bail!("timeouts.client_handshake_secs must be non-zero");
        }
        if self.timeouts.client_idle_secs.is_some_and(|d| d.is_zero()) {
            bail!("timeouts.client_idle_secs must be non-zero when set");
        }
        if self
            .interceptor
            .strip_handshake_fields
            .iter()
            .any(|f| f.is_empty())
        {
            bail!("interceptor.strip_handshake_fields cannot contain an empty name");
        }

        if let Some(interval) = self.backend.health_check_interval
            && interval < MIN_RECOMMENDED_HEALTH_CHECK
        {
            tracing::warn!(
                "backend.health_check_interval is {:?} (< {:?}); idle sweeps this frequent \
                 churn connections for little benefit",
                interval,
                MIN_RECOMMENDED_HEALTH_CHECK
            );
        }
        if self.backend.tls_skip_verify {
            tracing::warn!("Backend certificate verification is disabled");
        }

        Ok(())
    }
}
