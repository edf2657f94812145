//! Listener resolution.
//!
//! Produces the single listening socket a server run accepts on. A socket
//! handed down by the process supervisor always wins over binding a fresh one.
use crate::server::ServerConfig;
use std::borrow::Cow;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Address bound when no address is configured: all interfaces, HTTP port.
pub const DEFAULT_ADDR: &str = "0.0.0.0:80";

#[derive(Debug, Error)]
pub enum BindError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to adopt inherited listener: {0}")]
    Inherited(#[source] std::io::Error),
}

impl BindError {
    pub fn io(&self) -> &std::io::Error {
        match self {
            BindError::Bind { source, .. } => source,
            BindError::Inherited(e) => e,
        }
    }
}

/// Listening sockets opened by an external supervisor before startup.
///
/// Decoding how they were passed (file descriptors, environment) happens
/// before this type is built. Only the first entry is ever used.
#[derive(Debug, Default)]
pub struct InheritedListeners(Vec<std::net::TcpListener>);

impl InheritedListeners {
    pub fn new(listeners: Vec<std::net::TcpListener>) -> Self {
        Self(listeners)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<std::net::TcpListener>> for InheritedListeners {
    fn from(listeners: Vec<std::net::TcpListener>) -> Self {
        Self(listeners)
    }
}

impl FromIterator<std::net::TcpListener> for InheritedListeners {
    fn from_iter<I: IntoIterator<Item = std::net::TcpListener>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Address a fresh listener binds to for the configured `addr`.
///
/// Empty means [`DEFAULT_ADDR`]. A missing host (`":8080"`) means all
/// interfaces. Anything else is used verbatim.
pub fn bind_addr(addr: &str) -> Cow<'_, str> {
    if addr.is_empty() {
        Cow::Borrowed(DEFAULT_ADDR)
    } else if addr.starts_with(':') {
        Cow::Owned(format!("0.0.0.0{addr}"))
    } else {
        Cow::Borrowed(addr)
    }
}

/// Selects or creates the listener for one server run.
///
/// Must be called from within a tokio runtime.
pub async fn resolve(
    config: &ServerConfig,
    inherited: InheritedListeners,
) -> Result<TcpListener, BindError> {
    let ignored = inherited.len().saturating_sub(1);
    let mut listeners = inherited.0.into_iter();

    if let Some(first) = listeners.next() {
        if ignored > 0 {
            debug!(ignored, "using first inherited listener, closing the rest");
        }
        drop(listeners);

        first.set_nonblocking(true).map_err(BindError::Inherited)?;
        let listener = TcpListener::from_std(first).map_err(BindError::Inherited)?;
        if let Ok(local) = listener.local_addr() {
            info!(addr = %local, "using inherited listener");
        }
        return Ok(listener);
    }

    let addr = bind_addr(config.addr());
    let listener = TcpListener::bind(addr.as_ref())
        .await
        .map_err(|source| BindError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    if let Ok(local) = listener.local_addr() {
        info!(addr = %local, "bound listener");
    }
    Ok(listener)
}
