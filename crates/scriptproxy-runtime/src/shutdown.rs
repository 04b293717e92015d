//! Graceful shutdown with signal handling

use std::io;
use tokio::signal;
use tokio::sync::watch;

/// Process-wide shutdown broadcaster
///
/// Backed by a `watch` channel, so a listener created after the trigger still
/// observes the shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    sender: std::sync::Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create a new, untriggered shutdown signal
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: std::sync::Arc::new(sender),
        }
    }

    /// Subscribe to shutdown notifications
    pub fn subscribe(&self) -> ShutdownListener {
        ShutdownListener {
            receiver: self.sender.subscribe(),
        }
    }

    /// Trigger shutdown
    pub fn trigger(&self) {
        if !self.sender.send_replace(true) {
            tracing::info!("Shutdown signal triggered");
        }
    }

    /// Check if shutdown was triggered
    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of a [`ShutdownSignal`]
#[derive(Debug, Clone)]
pub struct ShutdownListener {
    receiver: watch::Receiver<bool>,
}

impl ShutdownListener {
    /// Wait until shutdown is triggered.
    ///
    /// Returns immediately if it already was. A dropped [`ShutdownSignal`]
    /// counts as a shutdown.
    pub async fn wait(&mut self) {
        // Err means every sender is gone.
        let _ = self.receiver.wait_for(|triggered| *triggered).await;
    }

    /// Check if shutdown was triggered
    pub fn is_triggered(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Signal handler for OS signals
#[derive(Debug)]
pub struct SignalHandler {
    signal: ShutdownSignal,
}

impl SignalHandler {
    /// Create a new signal handler
    pub fn new(signal: ShutdownSignal) -> Self {
        Self { signal }
    }

    /// Wait for SIGINT or SIGTERM (Ctrl+C off unix) and trigger shutdown
    pub async fn run(self) -> io::Result<()> {
        #[cfg(unix)]
        {
            use signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
                _ = sigint.recv() => tracing::info!("Received SIGINT"),
            }
        }

        #[cfg(not(unix))]
        {
            signal::ctrl_c().await?;
            tracing::info!("Received Ctrl+C");
        }

        self.signal.trigger();
        Ok(())
    }
}
