// src/host.rs
//! Hosting process context shared with the link

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Running flag, keep-alive hold and shutdown signal of the hosting process.
#[derive(Debug)]
pub struct HostContext {
    running: AtomicBool,
    keep_alive: AtomicBool,
    shutdown: Mutex<CancellationToken>,
}

impl HostContext {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            keep_alive: AtomicBool::new(false),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    /// Mark the host as running; a shutdown signal left over from an
    /// earlier run is replaced.
    pub fn mark_running(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut shutdown = self.lock_shutdown();
        if shutdown.is_cancelled() {
            *shutdown = CancellationToken::new();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn acquire_keep_alive(&self) {
        if !self.keep_alive.swap(true, Ordering::SeqCst) {
            debug!("Keep-alive acquired");
        }
    }

    pub fn release_keep_alive(&self) {
        if self.keep_alive.swap(false, Ordering::SeqCst) {
            debug!("Keep-alive released");
        }
    }

    pub fn holds_keep_alive(&self) -> bool {
        self.keep_alive.load(Ordering::SeqCst)
    }

    /// Ask the hosting process to stop.
    pub fn request_shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.lock_shutdown().cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.lock_shutdown().clone()
    }

    fn lock_shutdown(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for HostContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_and_restart() {
        let host = HostContext::new();
        host.mark_running();
        host.acquire_keep_alive();
        let token = host.shutdown_token();
        assert!(host.is_running());
        assert!(host.holds_keep_alive());

        host.release_keep_alive();
        host.request_shutdown();
        assert!(token.is_cancelled());
        assert!(!host.is_running());

        host.mark_running();
        assert!(!host.shutdown_token().is_cancelled());
    }
}
