//! Cooperative shutdown for long-running tasks.
//!
//! A [`Shutdown`] flips a `watch` flag once; background tasks hold a
//! [`ShutdownSignal`] and stop at their next await point.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

/// Owner side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Triggers shutdown on SIGINT or SIGTERM (Ctrl+C elsewhere).
    pub fn listen_for_signals(&self) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            let _ = tx.send(true);
        });
    }

    /// Programmatically triggers a shutdown.
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns a signal for a task to wait on.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.rx.clone(),
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler, using Ctrl+C only");
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down");
            }
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        result = tokio::signal::ctrl_c() => {
            if result.is_ok() {
                info!("Received SIGINT, shutting down");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C, shutting down");
    }
}

/// Receiver side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Completes once shutdown has been triggered (or the owner dropped).
    pub async fn wait(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}
