use axum::http::{self, HeaderValue};
use axum::{extract::Request, middleware::Next, response::Response};
use tracing::Span;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request correlation id, available to handlers as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Propagate (or mint) `x-request-id` on the request, its extensions and the response.
pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        req.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(req).await;

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// The id set by [`request_id_middleware`], or `"-"` outside of it.
pub fn request_id<B>(req: &http::Request<B>) -> &str {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.as_str())
        .unwrap_or("-")
}

/// Span for `TraceLayer::make_span_with`, tagging every event of the request
/// with its request id. The request id layer must wrap the trace layer.
pub fn request_span<B>(req: &http::Request<B>) -> Span {
    tracing::info_span!(
        "http_request",
        method = %req.method(),
        uri = %req.uri(),
        request_id = %request_id(req),
    )
}
