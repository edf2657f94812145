//! Request handling capability injected into the server.
//!
//! The lifecycle manager never inspects requests itself. It is handed a
//! [`Handler`] which turns one request into one response, and adapts it into
//! a hyper service for each accepted connection.
use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub mod echo;

pub use echo::Echo;

/// Response type produced by handlers.
pub type HttpResponse = Response<Full<Bytes>>;

/// Processes one request and produces a response.
///
/// Failures are the handler's responsibility to express as an HTTP response;
/// the server has no notion of a failed request.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, req: Request<Incoming>) -> HttpResponse;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Request<Incoming>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HttpResponse> + Send + 'static,
{
    async fn handle(&self, req: Request<Incoming>) -> HttpResponse {
        (self)(req).await
    }
}

/// Hyper service wrapping a shared [`Handler`].
///
/// One of these is cloned into every connection task.
#[derive(Clone)]
pub struct HandlerService {
    handler: Arc<dyn Handler>,
}

impl HandlerService {
    pub fn new(handler: Arc<dyn Handler>) -> Self {
        Self { handler }
    }
}

impl Service<Request<Incoming>> for HandlerService {
    type Response = HttpResponse;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move { Ok(handler.handle(req).await) })
    }
}

impl std::fmt::Debug for HandlerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerService").finish_non_exhaustive()
    }
}
