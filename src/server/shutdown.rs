//! Termination signals and listener close
//!
//! SIGTERM and SIGINT both start the same shutdown sequence. The handlers
//! are registered up front, before the listener is bound, so a signal
//! that arrives during startup still goes through the graceful path.
//! Once the first signal has been seen, the same streams keep draining
//! for the rest of the process: later signals are logged and ignored.

use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Ask the server to stop accepting connections
///
/// Closing is remembered, so the server still stops if it starts
/// waiting after `close` was called.
#[derive(Clone)]
pub struct CloseHandle {
    notify: Arc<Notify>,
}

impl CloseHandle {
    pub fn close(&self) {
        self.notify.notify_one();
        info!("Listener close requested");
    }
}

/// Server-side half of the listener-close pair
pub struct CloseSignal {
    notify: Arc<Notify>,
}

impl CloseSignal {
    /// Resolve once the listener should close
    pub async fn closed(self) {
        self.notify.notified().await;
    }
}

/// Create a linked (handle, signal) pair for one listener
pub fn listener_close() -> (CloseHandle, CloseSignal) {
    let notify = Arc::new(Notify::new());
    (
        CloseHandle {
            notify: notify.clone(),
        },
        CloseSignal { notify },
    )
}

/// Registered SIGTERM/SIGINT streams
pub struct TerminationSignals {
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    /// Install the handlers now; signals delivered from here on are queued
    #[cfg(unix)]
    pub fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    #[cfg(not(unix))]
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn next(&mut self) -> Option<&'static str> {
        tokio::select! {
            Some(()) = self.sigterm.recv() => Some("SIGTERM"),
            Some(()) = self.sigint.recv() => Some("SIGINT"),
            else => None,
        }
    }

    #[cfg(not(unix))]
    async fn next(&mut self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|()| "CTRL_C")
    }

    /// Wait for the first signal and return its name
    ///
    /// Every later signal is swallowed by a background task so the
    /// default disposition cannot kill the process mid-drain.
    pub async fn first(mut self) -> &'static str {
        let Some(name) = self.next().await else {
            // Streams closed with the runtime: nothing can trigger shutdown
            return std::future::pending().await;
        };
        info!(signal = name, "Received termination signal");

        tokio::spawn(async move {
            while let Some(again) = self.next().await {
                warn!(signal = again, "Already shutting down, ignoring signal");
            }
        });
        name
    }
}
