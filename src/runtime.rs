//! Tokio runtime selection and shutdown signal handling for the binary

use anyhow::Result;

use crate::types::ThreadCount;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    worker_threads: usize,
}

impl RuntimeConfig {
    /// `None` means one thread; `Some(0)` was already mapped to the core count
    #[must_use]
    pub fn from_args(threads: Option<ThreadCount>) -> Self {
        Self {
            worker_threads: threads.map_or(1, |t| t.get()),
        }
    }

    #[must_use]
    pub const fn worker_threads(&self) -> usize {
        self.worker_threads
    }

    #[must_use]
    pub const fn is_single_threaded(&self) -> bool {
        self.worker_threads == 1
    }

    /// A current-thread runtime for one thread, multi-thread otherwise
    pub fn build_runtime(self) -> Result<tokio::runtime::Runtime> {
        let rt = if self.is_single_threaded() {
            tracing::info!("Starting proxy with single-threaded runtime");
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?
        } else {
            tracing::info!("Starting proxy with {} worker threads", self.worker_threads);
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(self.worker_threads)
                .enable_all()
                .build()?
        };
        Ok(rt)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_args(None)
    }
}

/// Wait for Ctrl+C, or SIGTERM on Unix
///
/// If a handler cannot be installed that signal source is ignored.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
