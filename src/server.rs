//! Serve and graceful shutdown lifecycle.
//!
//! A run has two concurrent participants:
//!
//! 1. The accept loop owns the listener and spawns one task per connection.
//! 2. The notifier task waits for a [`TerminationNotifier`] and sends a single
//!    message to the accept loop when shutdown should begin.
//!
//! On that message the accept loop drops the listener and tells every open
//! connection to finish its current request and close (keep-alive off).
//! The caller then waits, bounded by the shutdown timeout, for connection
//! tasks to finish. Whatever is still open at the deadline is force-closed.
use crate::handler::{Handler, HandlerService, HttpResponse};
use crate::listener::{self, BindError, InheritedListeners};
use crate::signal::{ShutdownReason, TerminationNotifier};
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::Service;
use hyper_util::rt::{TokioIo, TokioTimer};
use nix::errno::Errno;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Default grace period for in-flight requests once shutdown begins.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a connection that has not sent a request yet is given to do so
/// once shutdown begins. Until then it is not considered idle.
const NEW_CONNECTION_GRACE: Duration = Duration::from_secs(5);

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    #[error("accept loop panicked: {0}")]
    Panicked(#[source] JoinError),
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error(
        "drain timed out after {} with {remaining} connection(s) still open",
        fmt_duration(.timeout)
    )]
    Timeout { timeout: Duration, remaining: usize },
}

/// Outcome of a failed run, tagged with the phase that failed.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("listen: {0}")]
    Listen(#[from] BindError),

    #[error("serve: {0}")]
    Serve(#[from] ServeError),

    #[error("shutdown: {0}")]
    Shutdown(#[from] ShutdownError),

    /// The accept loop failed and the drain that followed failed too.
    #[error("serve: {serve}; shutdown: {shutdown}")]
    ServeAndShutdown {
        serve: ServeError,
        shutdown: ShutdownError,
    },
}

fn fmt_duration(d: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*d)
}

/// Everything one run needs: where to listen, what to serve, and how long
/// to wait for in-flight work on shutdown.
#[derive(Clone)]
pub struct ServerConfig {
    addr: String,
    handler: Arc<dyn Handler>,
    shutdown_timeout: Duration,
}

impl ServerConfig {
    /// An empty `addr` binds [`DEFAULT_ADDR`](crate::listener::DEFAULT_ADDR).
    /// A zero `shutdown_timeout` closes connections without a grace period.
    pub fn new(addr: impl Into<String>, handler: impl Handler, shutdown_timeout: Duration) -> Self {
        Self::with_shared_handler(addr, Arc::new(handler), shutdown_timeout)
    }

    pub fn with_shared_handler(
        addr: impl Into<String>,
        handler: Arc<dyn Handler>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            addr: addr.into(),
            handler,
            shutdown_timeout,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("addr", &self.addr)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

/// Resolves the listener for `config` and serves on it until `notifier`
/// fires and the drain completes.
pub async fn listen_and_serve<N: TerminationNotifier>(
    config: ServerConfig,
    inherited: InheritedListeners,
    notifier: N,
) -> Result<(), LifecycleError> {
    let listener = listener::resolve(&config, inherited).await?;
    Server::from(config).run(listener, notifier).await
}

/// Serves HTTP/1.1 on an already resolved listener.
pub struct Server {
    handler: Arc<dyn Handler>,
    shutdown_timeout: Duration,
    http: http1::Builder,
}

impl From<ServerConfig> for Server {
    fn from(config: ServerConfig) -> Self {
        Self::with_shared_handler(config.handler, config.shutdown_timeout)
    }
}

impl Server {
    pub fn new(handler: impl Handler, shutdown_timeout: Duration) -> Self {
        Self::with_shared_handler(Arc::new(handler), shutdown_timeout)
    }

    pub fn with_shared_handler(handler: Arc<dyn Handler>, shutdown_timeout: Duration) -> Self {
        let mut http = http1::Builder::new();
        http.timer(TokioTimer::new());
        Self {
            handler,
            shutdown_timeout,
            http,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Serves until the notifier fires or accepting fails, then drains.
    ///
    /// The listener is closed before this returns, whatever the outcome.
    /// Must be called from within a tokio runtime.
    pub async fn run<N: TerminationNotifier>(
        self,
        listener: TcpListener,
        notifier: N,
    ) -> Result<(), LifecycleError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "serving");
        }

        let (begin_tx, begin_rx) = oneshot::channel();
        let notifier_task = tokio::spawn(async move {
            let mut notifier = notifier;
            let reason = notifier.recv().await;
            // The accept loop is gone if this fails, nothing left to stop.
            let _ = begin_tx.send(reason);
        });

        let connections = Connections {
            service: HandlerService::new(self.handler),
            http: self.http,
            tracker: TaskTracker::new(),
            draining: CancellationToken::new(),
            terminate: CancellationToken::new(),
        };

        let accept = tokio::spawn(accept_loop(listener, begin_rx, connections.clone()));
        let served = match accept.await {
            Ok(result) => result,
            Err(e) => Err(ServeError::Panicked(e)),
        };
        notifier_task.abort();

        // Normally done by the accept loop on its way out, repeated here in
        // case it panicked.
        connections.draining.cancel();
        connections.tracker.close();

        let drained = connections.drain(self.shutdown_timeout).await;
        outcome(served, drained)
    }
}

fn outcome(
    served: Result<(), ServeError>,
    drained: Result<(), ShutdownError>,
) -> Result<(), LifecycleError> {
    match (served, drained) {
        (Ok(()), Ok(())) => {
            info!("server stopped");
            Ok(())
        }
        (Err(serve), Ok(())) => Err(LifecycleError::Serve(serve)),
        (Ok(()), Err(shutdown)) => Err(LifecycleError::Shutdown(shutdown)),
        (Err(serve), Err(shutdown)) => Err(LifecycleError::ServeAndShutdown { serve, shutdown }),
    }
}

/// Accepts until told to stop, then closes the listener and starts the
/// drain on every open connection.
async fn accept_loop(
    listener: TcpListener,
    mut begin: oneshot::Receiver<ShutdownReason>,
    connections: Connections,
) -> Result<(), ServeError> {
    let mut backoff: Option<Duration> = None;
    let mut resume_at: Option<Instant> = None;

    let result = loop {
        tokio::select! {
            biased;

            reason = &mut begin => {
                match reason {
                    Ok(reason) => info!(%reason, "no longer accepting connections"),
                    Err(_) => warn!("termination notifier stopped, no longer accepting connections"),
                }
                break Ok(());
            }

            _ = tokio::time::sleep_until(resume_at.unwrap_or_else(Instant::now)), if resume_at.is_some() => {
                resume_at = None;
            }

            accepted = listener.accept(), if resume_at.is_none() => match accepted {
                Ok((stream, peer)) => {
                    backoff = None;
                    connections.spawn(stream, peer);
                }
                Err(e) if is_transient(&e) => {
                    let delay = next_backoff(backoff);
                    backoff = Some(delay);
                    resume_at = Some(Instant::now() + delay);
                    warn!(error = %e, retry_in = ?delay, "accept failed, retrying");
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    break Err(ServeError::Accept(e));
                }
            },
        }
    };

    drop(listener);
    connections.draining.cancel();
    connections.tracker.close();
    result
}

fn next_backoff(previous: Option<Duration>) -> Duration {
    match previous {
        None => ACCEPT_BACKOFF_MIN,
        Some(d) => (d * 2).min(ACCEPT_BACKOFF_MAX),
    }
}

/// Accept errors that say nothing about the health of the listener itself.
fn is_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    if matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
    ) {
        return true;
    }

    matches!(
        e.raw_os_error().map(Errno::from_raw),
        Some(Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM)
    )
}

/// Shared state for connection tasks of one run.
#[derive(Clone)]
struct Connections {
    service: HandlerService,
    http: http1::Builder,
    tracker: TaskTracker,
    /// Cancelled when shutdown begins: finish the current request and close.
    draining: CancellationToken,
    /// Cancelled when the shutdown timeout expires: close now.
    terminate: CancellationToken,
}

impl Connections {
    fn spawn(&self, stream: TcpStream, peer: SocketAddr) {
        debug!(%peer, "accepted connection");

        let started = CancellationToken::new();
        let service = TrackedService {
            inner: self.service.clone(),
            started: started.clone(),
        };
        let conn = self.http.serve_connection(TokioIo::new(stream), service);
        let draining = self.draining.clone();
        let terminate = self.terminate.clone();
        let accepted_at = Instant::now();

        self.tracker.spawn(async move {
            tokio::pin!(conn);

            let mut draining_seen = false;
            let mut closing = false;

            loop {
                tokio::select! {
                    res = conn.as_mut() => {
                        if let Err(e) = res {
                            debug!(%peer, error = %e, "connection error");
                        }
                        break;
                    }

                    _ = draining.cancelled(), if !draining_seen => {
                        draining_seen = true;
                        if started.is_cancelled() || accepted_at.elapsed() >= NEW_CONNECTION_GRACE {
                            closing = true;
                            conn.as_mut().graceful_shutdown();
                        }
                    }

                    // A connection accepted just before shutdown gets a chance
                    // to send its first request instead of being closed as idle.
                    _ = first_request(&started, accepted_at + NEW_CONNECTION_GRACE), if draining_seen && !closing => {
                        closing = true;
                        conn.as_mut().graceful_shutdown();
                    }

                    _ = terminate.cancelled() => {
                        debug!(%peer, "connection force-closed");
                        break;
                    }
                }
            }

            debug!(%peer, "connection closed");
        });
    }

    /// Waits for every connection task, closing the stragglers at the deadline.
    async fn drain(&self, timeout: Duration) -> Result<(), ShutdownError> {
        info!(
            active = self.tracker.len(),
            timeout = %fmt_duration(&timeout),
            "draining connections"
        );

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                info!("all connections closed");
                Ok(())
            }
            Err(_) => {
                let remaining = self.tracker.len();
                warn!(remaining, "shutdown timeout reached, closing remaining connections");
                self.terminate.cancel();
                self.tracker.wait().await;
                Err(ShutdownError::Timeout { timeout, remaining })
            }
        }
    }
}

async fn first_request(started: &CancellationToken, deadline: Instant) {
    tokio::select! {
        _ = started.cancelled() => {}
        _ = tokio::time::sleep_until(deadline) => {}
    }
}

/// Marks the connection as having started a request before handing it on.
#[derive(Clone)]
struct TrackedService {
    inner: HandlerService,
    started: CancellationToken,
}

impl Service<Request<Incoming>> for TrackedService {
    type Response = HttpResponse;
    type Error = <HandlerService as Service<Request<Incoming>>>::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        self.started.cancel();
        self.inner.call(req)
    }
}
