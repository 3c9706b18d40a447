//! Signal handling for long-running engine processes.
//!
//! SIGTERM/SIGINT request shutdown; SIGHUP asks the engine to retry the
//! actuator open (for boards plugged in after start). The serve loop polls
//! the flags rather than blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Signal state shared between the OS hooks and the serve loop.
#[derive(Clone, Default)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
    reconnect_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register OS signal hooks. Registration failures
    /// are reported on stderr and otherwise ignored.
    pub fn install() -> Self {
        let handler = Self::default();
        handler.register_signals();
        handler
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_reconnect(&self) {
        self.reconnect_flag.store(true, Ordering::Relaxed);
    }

    pub fn shutdown_flag(&self) -> &AtomicBool {
        &self.shutdown_flag
    }

    /// Cleared by whoever acts on it.
    pub fn reconnect_flag(&self) -> &AtomicBool {
        &self.reconnect_flag
    }

    fn register_signals(&self) {
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[SBIN-SIGNAL] failed to register SIGTERM: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.shutdown_flag)) {
            eprintln!("[SBIN-SIGNAL] failed to register SIGINT: {e}");
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::SIGHUP;
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.reconnect_flag)) {
                eprintln!("[SBIN-SIGNAL] failed to register SIGHUP: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_quiet() {
        let handler = SignalHandler::default();
        assert!(!handler.should_shutdown());
        assert!(!handler.reconnect_flag().load(Ordering::Relaxed));
    }

    #[test]
    fn clones_share_flags() {
        let handler = SignalHandler::default();
        let other = handler.clone();
        handler.request_shutdown();
        other.request_reconnect();
        assert!(other.should_shutdown());
        assert!(handler.reconnect_flag().swap(false, Ordering::Relaxed));
        assert!(!handler.reconnect_flag().load(Ordering::Relaxed));
    }
}
