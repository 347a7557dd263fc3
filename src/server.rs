//! HTTP server.
//!
//! Builds the router from [`crate::api::routes`], adds the cross-cutting
//! layers, and serves until Ctrl-C.
//!
//! # Error Contract
//!
//! Every response body is an envelope:
//!
//! ```json
//! { "code": 0, "msg": "操作成功", "data": { ... } }
//! ```
//!
//! Business and validation failures use HTTP 200 with a non-zero `code`.
//! Only transport-level failures change the status: unknown route (404),
//! unsupported method (405), request timeout (408) and a panic inside a
//! handler (500). Those still carry an envelope whose `code` equals the
//! status.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted; the desktop shell and
//! the web client are served from different origins.

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use std::any::Any;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::maintenance::Scheduler;
use crate::response::{transport_error, ErrorCode};

/// Room for base64 expansion of the largest allowed upload, plus the JSON around it.
fn body_limit(max_upload_bytes: usize) -> usize {
    max_upload_bytes / 3 * 4 + 64 * 1024
}

/// The complete application, ready to serve or to drive with `oneshot`.
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AnyOrigin)
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);
    let timeout = Duration::from_secs(ctx.config.server.request_timeout_secs);
    let limit = body_limit(ctx.config.storage.max_upload_bytes);

    crate::api::routes()
        .fallback(fallback)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(DefaultBodyLimit::max(limit))
        .layer(middleware::from_fn_with_state(timeout, enforce_timeout))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

async fn fallback() -> Response {
    transport_error(StatusCode::NOT_FOUND, ErrorCode::NOT_FOUND)
}

async fn method_not_allowed() -> Response {
    transport_error(StatusCode::METHOD_NOT_ALLOWED, ErrorCode::METHOD_NOT_ALLOWED)
}

/// Drop the handler future once `limit` elapses. Work it spawned keeps running.
async fn enforce_timeout(State(limit): State<Duration>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(path = %path, timeout = ?limit, "request timed out");
            transport_error(StatusCode::REQUEST_TIMEOUT, ErrorCode::REQUEST_TIMEOUT)
        }
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "handler panicked");
    transport_error(StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::SYSTEM_ERROR)
}

/// Serve until Ctrl-C, then stop background jobs and close the stores.
pub async fn run_server(ctx: AppContext) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let scheduler = Scheduler::start(&ctx);
    let app = build_router(ctx.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening");
    println!("memohub {} listening on http://{}", env!("CARGO_PKG_VERSION"), bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    scheduler.stop().await;
    ctx.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
