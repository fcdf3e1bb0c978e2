//! Shutdown coordination.
//!
//! The first request (signal or programmatic) starts a graceful stop; a second one
//! is reported as forced and the binary exits at once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exit code used when a second signal arrives during a graceful stop.
pub const FORCED_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownRequest {
    Graceful,
    Forced,
}

#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    quitting: Arc<AtomicBool>,
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) -> ShutdownRequest {
        if self.quitting.swap(true, Ordering::SeqCst) {
            ShutdownRequest::Forced
        } else {
            self.token.cancel();
            ShutdownRequest::Graceful
        }
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::SeqCst)
    }

    /// Resolves once shutdown has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Which signal arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
pub async fn wait_for_signal() -> std::io::Result<Signal> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|_| Signal::Interrupt),
            _ = terminate.recv() => Ok(Signal::Terminate),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|_| Signal::Interrupt)
    }
}

/// Route process signals into `shutdown`. Installed before any connection is opened
/// so that a signal during startup still stops the worker in order.
pub fn spawn_signal_listener(shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let signal = match wait_for_signal().await {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install signal handler");
                    return;
                }
            };

            match shutdown.request() {
                ShutdownRequest::Graceful => {
                    tracing::info!(?signal, "Received signal, shutting down gracefully");
                }
                ShutdownRequest::Forced => {
                    tracing::warn!(?signal, "Received second signal, exiting immediately");
                    std::process::exit(FORCED_EXIT_CODE);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn second_request_is_forced() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_quitting());
        assert_eq!(shutdown.request(), ShutdownRequest::Graceful);
        assert!(shutdown.is_quitting());
        assert_eq!(shutdown.request(), ShutdownRequest::Forced);
    }

    #[tokio::test]
    async fn clones_observe_the_same_request() {
        let shutdown = Shutdown::new();
        let observer = shutdown.clone();
        let waiter = tokio::spawn(async move { observer.cancelled().await });

        shutdown.request();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancelled() should resolve")
            .unwrap();
    }
}
