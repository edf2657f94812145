//! # handover
//!
//! `handover` runs an HTTP/1.1 service through its whole lifecycle: it takes
//! over a listening socket handed down by a process supervisor (or binds a
//! fresh one), serves requests through an injected [`Handler`], and on
//! SIGINT/SIGTERM stops accepting, lets in-flight requests finish within a
//! bounded grace period, and reports which phase failed if anything did.
//!
//! ```rust,ignore
//! use handover::{Echo, InheritedListeners, OsSignals, ServerConfig, listen_and_serve};
//! use std::time::Duration;
//!
//! let config = ServerConfig::new(":8080", Echo, Duration::from_secs(10));
//! listen_and_serve(config, InheritedListeners::default(), OsSignals::new()?).await?;
//! ```
pub mod cmd;
pub mod config;
pub mod error;
pub mod handler;
pub mod listener;
pub mod logging;
pub mod server;
pub mod signal;

pub use handler::{Echo, Handler, HttpResponse};
pub use listener::{BindError, InheritedListeners, resolve};
pub use server::{
    LifecycleError, ServeError, Server, ServerConfig, ShutdownError, listen_and_serve,
};
pub use signal::{ManualNotifier, OsSignals, ShutdownReason, ShutdownTrigger, TerminationNotifier};
