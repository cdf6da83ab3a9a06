use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, error_handling::HandleErrorLayer, extract::ConnectInfo, extract::Request,
    http::StatusCode, response::IntoResponse, routing::get,
};
use gate_limit::SlidingWindow;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_gate::{GateError, RateLimitLayer};

#[tokio::main]
async fn main() {
    // 1. Setup Strategy: two requests per client per minute
    let limit = NonZeroUsize::new(2).unwrap();
    let strategy = Arc::new(SlidingWindow::new(limit, Duration::from_secs(60)));

    // 2. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, World!" }))
        .layer(
            ServiceBuilder::new()
                // The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_gate_error))
                .layer(RateLimitLayer::new(strategy, client_id)),
        );

    // 3. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .unwrap();
    println!("Listening on http://127.0.0.1:3000");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}

/// Prefer an explicit API key, fall back to the peer address.
fn client_id(request: &Request) -> String {
    if let Some(key) = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
    {
        return key.to_owned();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// The signature must match BoxError -> IntoResponse
async fn handle_gate_error(err: BoxError) -> impl IntoResponse {
    if let Some(gate_err) = err.downcast_ref::<GateError>() {
        gate_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
