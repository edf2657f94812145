use super::{Handler, HttpResponse};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Request, Response, StatusCode};
use tracing::{debug, warn};

/// Responds with the request body, preserving its content type.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn handle(&self, req: Request<Incoming>) -> HttpResponse {
        debug!(method = ?req.method(), path = req.uri().path(), "echo request");

        let content_type = req.headers().get(CONTENT_TYPE).cloned();
        let body = match req.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(error = %e, "failed to read request body");
                let mut resp = Response::new(Full::new(Bytes::from_static(b"unreadable body\n")));
                *resp.status_mut() = StatusCode::BAD_REQUEST;
                return resp;
            }
        };

        let mut resp = Response::new(Full::new(body));
        resp.headers_mut().insert(
            CONTENT_TYPE,
            content_type.unwrap_or_else(|| HeaderValue::from_static("application/octet-stream")),
        );
        resp
    }
}
