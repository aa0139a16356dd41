//! HTTP metrics middleware for capturing all request/response metrics
//!
//! Captures metrics for ALL HTTP responses including framework-level
//! errors that occur before handlers run:
//! - 415 Unsupported Media Type (wrong Content-Type)
//! - 400/422 JSON rejections
//! - 404 Not Found
//! - 405 Method Not Allowed

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::observability::metrics::record_http_request;

/// Middleware that records HTTP request metrics for all responses.
///
/// Applied as the outermost layer.
pub async fn http_metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    record_http_request(&method, &path, response.status().as_u16(), start.elapsed());

    response
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::post,
        Json, Router,
    };
    use tower::ServiceExt;

    async fn echo(Json(value): Json<serde_json::Value>) -> Json<serde_json::Value> {
        Json(value)
    }

    fn test_app() -> Router {
        Router::new()
            .route("/api/v1/channels/join", post(echo))
            .layer(middleware::from_fn(http_metrics_middleware))
    }

    #[tokio::test]
    async fn test_middleware_passes_response_through() {
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/v1/channels/join")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"passphrase":"p"}"#))
            .expect("request builder should succeed");

        let response = test_app()
            .oneshot(request)
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_middleware_sees_framework_rejections() {
        // Missing content type: rejected by the Json extractor before the handler.
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/v1/channels/join")
            .body(Body::from(r#"{"passphrase":"p"}"#))
            .expect("request builder should succeed");

        let response = test_app()
            .oneshot(request)
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_middleware_sees_unknown_routes() {
        let request = HttpRequest::builder()
            .method("GET")
            .uri("/nope")
            .body(Body::empty())
            .expect("request builder should succeed");

        let response = test_app()
            .oneshot(request)
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
