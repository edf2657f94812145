//! Termination notification for graceful shutdown.
//!
//! Signal delivery is process-wide state, so the server never installs
//! handlers itself. It is handed a [`TerminationNotifier`] whose only job is
//! to resolve once when shutdown should begin. [`OsSignals`] listens for
//! SIGINT and SIGTERM; [`ManualNotifier`] is driven from code.
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Why a graceful shutdown was started.
///
/// The server treats every variant the same way. It is only reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    Requested,
}

impl std::fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownReason::Interrupt => write!(f, "SIGINT"),
            ShutdownReason::Terminate => write!(f, "SIGTERM"),
            ShutdownReason::Requested => write!(f, "shutdown request"),
        }
    }
}

/// A source of termination events.
#[async_trait]
pub trait TerminationNotifier: Send + 'static {
    /// Resolves when shutdown should begin.
    ///
    /// There is no timeout. Callers that never see a termination event
    /// block forever.
    async fn recv(&mut self) -> ShutdownReason;
}

/// Listens for process termination signals.
///
/// Handlers are installed on construction, not on the first call to
/// [`recv`](TerminationNotifier::recv), so a signal that arrives while the
/// listener is still being set up is not lost.
#[cfg(unix)]
pub struct OsSignals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl OsSignals {
    pub fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }
}

#[cfg(unix)]
#[async_trait]
impl TerminationNotifier for OsSignals {
    async fn recv(&mut self) -> ShutdownReason {
        let reason = tokio::select! {
            _ = self.sigterm.recv() => ShutdownReason::Terminate,
            _ = self.sigint.recv() => ShutdownReason::Interrupt,
        };
        info!("received {}, initiating graceful shutdown", reason);
        reason
    }
}

#[cfg(not(unix))]
pub struct OsSignals {
    _private: (),
}

#[cfg(not(unix))]
impl OsSignals {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self { _private: () })
    }
}

#[cfg(not(unix))]
#[async_trait]
impl TerminationNotifier for OsSignals {
    async fn recv(&mut self) -> ShutdownReason {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Without a ctrl-c handler there is nothing left to wait on.
            tracing::error!(error = %e, "failed to wait for ctrl-c");
            std::future::pending::<()>().await;
        }
        info!("received ctrl-c, initiating graceful shutdown");
        ShutdownReason::Interrupt
    }
}

/// Creates a notifier that resolves when the returned trigger fires.
pub fn manual() -> (ShutdownTrigger, ManualNotifier) {
    let token = CancellationToken::new();
    (
        ShutdownTrigger {
            token: token.clone(),
        },
        ManualNotifier { token },
    )
}

/// Requests shutdown of a server driven by a [`ManualNotifier`].
///
/// Cheap to clone. Triggering more than once has no further effect.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    token: CancellationToken,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Notifier paired with a [`ShutdownTrigger`], see [`manual`].
#[derive(Debug)]
pub struct ManualNotifier {
    token: CancellationToken,
}

#[async_trait]
impl TerminationNotifier for ManualNotifier {
    async fn recv(&mut self) -> ShutdownReason {
        self.token.cancelled().await;
        info!("shutdown requested, initiating graceful shutdown");
        ShutdownReason::Requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn manual_notifier_resolves_after_trigger() {
        let (trigger, mut notifier) = manual();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.trigger();
        });

        let reason = tokio::time::timeout(Duration::from_secs(1), notifier.recv())
            .await
            .expect("notifier should resolve");
        assert_eq!(reason, ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn manual_notifier_resolves_immediately_when_already_triggered() {
        let (trigger, mut notifier) = manual();
        trigger.trigger();

        tokio::time::timeout(Duration::from_millis(10), notifier.recv())
            .await
            .expect("notifier should resolve immediately");
    }

    #[tokio::test]
    async fn manual_notifier_blocks_until_triggered() {
        let (trigger, mut notifier) = manual();

        let waited = tokio::time::timeout(Duration::from_millis(20), notifier.recv()).await;
        assert!(waited.is_err());
        assert!(!trigger.is_triggered());
    }

    #[test]
    fn trigger_is_idempotent() {
        let (trigger, _notifier) = manual();
        let other = trigger.clone();

        trigger.trigger();
        trigger.trigger();
        other.trigger();

        assert!(trigger.is_triggered());
        assert!(other.is_triggered());
    }

    #[test]
    fn reason_display_names_the_signal() {
        assert_eq!(ShutdownReason::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownReason::Terminate.to_string(), "SIGTERM");
    }
}
