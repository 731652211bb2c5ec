//! Process-wide shutdown coordination
//!
//! A [`ShutdownFlag`] is set exactly once and observed by every task that
//! needs to stop. The [`ShutdownCoordinator`] translates termination
//! signals into that single transition.

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One-shot shutdown flag shared between tasks
///
/// Cloning shares the same underlying flag.
#[derive(Clone, Debug)]
pub struct ShutdownFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the flag. Returns `true` only for the call that flipped it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|set| {
            if *set {
                false
            } else {
                *set = true;
                true
            }
        })
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag has been set (immediately if it already is)
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|set| *set).await;
    }
}

/// Termination signals the service reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

impl TerminationSignal {
    pub fn number(&self) -> i32 {
        match self {
            TerminationSignal::Interrupt => 2,
            TerminationSignal::Terminate => 15,
        }
    }
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Interrupt => f.write_str("SIGINT"),
            TerminationSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Routes termination signals to the shutdown flag
#[derive(Clone, Debug)]
pub struct ShutdownCoordinator {
    flag: ShutdownFlag,
}

impl ShutdownCoordinator {
    pub fn new(flag: ShutdownFlag) -> Self {
        Self { flag }
    }

    pub fn flag(&self) -> &ShutdownFlag {
        &self.flag
    }

    /// Record a termination signal; only the first one has an effect
    pub fn handle_signal(&self, signal: TerminationSignal) -> bool {
        if self.flag.trigger() {
            info!(
                "Received signal {} ({}). Shutting down gracefully...",
                signal.number(),
                signal
            );
            true
        } else {
            debug!("Ignoring {} - shutdown already in progress", signal);
            false
        }
    }

    /// Install SIGINT/SIGTERM handlers and forward them until the process exits
    #[cfg(unix)]
    pub fn install(self) -> std::io::Result<JoinHandle<()>> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        Ok(tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(_) = sigint.recv() => TerminationSignal::Interrupt,
                    Some(_) = sigterm.recv() => TerminationSignal::Terminate,
                    else => break,
                };
                self.handle_signal(received);
            }
        }))
    }

    #[cfg(not(unix))]
    pub fn install(self) -> std::io::Result<JoinHandle<()>> {
        Ok(tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                self.handle_signal(TerminationSignal::Interrupt);
            }
        }))
    }
}
