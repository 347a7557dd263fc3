//! HTTP handlers and the route table.
//!
//! Every route except `/health` lives under `/api/v1`. Handlers are thin:
//! extract, call the service, wrap the result in [`ApiResponse`]. Errors
//! travel as [`AppError`](crate::error::AppError) and become envelopes.
//!
//! [`ApiResponse`]: crate::response::ApiResponse

mod admin;
mod ai;
mod auth;
pub mod extract;
mod files;
mod memos;
mod organize;
mod push;

use axum::routing::{get, post, put};
use axum::Router;

use crate::context::AppContext;

pub fn routes() -> Router<AppContext> {
    let api = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/memos", get(memos::list).post(memos::create))
        .route("/memos/search/semantic", get(memos::semantic_search))
        .route(
            "/memos/{id}",
            get(memos::get).put(memos::update).delete(memos::delete),
        )
        .route("/memos/{id}/related", get(memos::related))
        .route("/memos/{id}/annotate", post(memos::annotate))
        .route("/public/memos/{id}", get(memos::get_public))
        .route("/tags", get(organize::list_tags))
        .route(
            "/tags/{id}",
            put(organize::update_tag).delete(organize::delete_tag),
        )
        .route(
            "/categories",
            get(organize::list_categories).post(organize::create_category),
        )
        .route(
            "/categories/{id}",
            get(organize::get_category)
                .put(organize::update_category)
                .delete(organize::delete_category),
        )
        .route("/push-rules", get(push::list).post(push::create))
        .route(
            "/push-rules/{id}",
            get(push::get).put(push::update).delete(push::delete),
        )
        .route("/push-rules/{id}/test", post(push::test))
        .route("/push-rules/{id}/deliveries", get(push::deliveries))
        .route("/attachments", get(files::list).post(files::upload))
        .route("/attachments/{id}", get(files::get).delete(files::delete))
        .route("/attachments/{id}/content", get(files::content))
        .route("/ocr", post(files::recognize))
        .route("/ai/conversations", get(ai::list).post(ai::create))
        .route("/ai/conversations/{id}", get(ai::get).delete(ai::delete))
        .route("/ai/conversations/{id}/messages", post(ai::send))
        .route("/backup/status", get(admin::backup_status))
        .route("/backup/force", post(admin::backup_force))
        .route("/backup/cleanup", post(admin::backup_cleanup))
        .route("/system/info", get(admin::info))
        .route("/system/stats", get(admin::stats));

    Router::new()
        .route("/health", get(admin::health))
        .nest("/api/v1", api)
}
