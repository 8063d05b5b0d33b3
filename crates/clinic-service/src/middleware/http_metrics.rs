//! Request metrics for every HTTP response.
//!
//! Installed as the outermost layer so rejections produced by extractors
//! (malformed JSON, wrong content type), unknown routes, and timeouts are
//! counted the same way as handler responses. Long-lived SSE and WebSocket
//! requests are recorded when the response head is returned, not when the
//! stream ends.

use crate::observability::metrics::record_http_request;
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    let response = next.run(request).await;

    record_http_request(
        method.as_str(),
        &path,
        response.status().as_u16(),
        start.elapsed(),
    );
    response
}
