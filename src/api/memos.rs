use axum::extract::State;
use serde::Deserialize;

use super::extract::{AppJson, AppPath, AppQuery};
use crate::auth::AuthUser;
use crate::context::AppContext;
use crate::error::AppResult;
use crate::memos::{self, CreateMemoRequest, ListQuery, UpdateMemoRequest};
use crate::models::{Memo, Page, ScoredMemo};
use crate::response::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<usize>,
}

pub async fn list(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppQuery(query): AppQuery<ListQuery>,
) -> AppResult<ApiResponse<Page<Memo>>> {
    Ok(ApiResponse::success(
        memos::list_memos(&ctx.stores.vectors, &user, &query).await?,
    ))
}

pub async fn create(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppJson(req): AppJson<CreateMemoRequest>,
) -> AppResult<ApiResponse<Memo>> {
    Ok(ApiResponse::success(memos::create_memo(&ctx, &user, req).await?))
}

pub async fn get(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<Memo>> {
    Ok(ApiResponse::success(
        memos::get_memo(&ctx.stores.vectors, &user, &id).await?,
    ))
}

pub async fn update(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
    AppJson(req): AppJson<UpdateMemoRequest>,
) -> AppResult<ApiResponse<Memo>> {
    Ok(ApiResponse::success(
        memos::update_memo(&ctx, &user, &id, req).await?,
    ))
}

pub async fn delete(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<()>> {
    memos::delete_memo(&ctx, &user, &id).await?;
    Ok(ApiResponse::success(()))
}

pub async fn related(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
    AppQuery(query): AppQuery<LimitQuery>,
) -> AppResult<ApiResponse<Vec<ScoredMemo>>> {
    Ok(ApiResponse::success(
        memos::related_memos(&ctx, &user, &id, query.limit).await?,
    ))
}

pub async fn semantic_search(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppQuery(query): AppQuery<SearchQuery>,
) -> AppResult<ApiResponse<Vec<ScoredMemo>>> {
    Ok(ApiResponse::success(
        memos::semantic_search(&ctx, &user, &query.q, query.limit).await?,
    ))
}

pub async fn annotate(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<Memo>> {
    Ok(ApiResponse::success(
        memos::annotate_memo(&ctx, &user, &id).await?,
    ))
}

/// No authentication; only memos marked public are returned.
pub async fn get_public(
    State(ctx): State<AppContext>,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<Memo>> {
    Ok(ApiResponse::success(
        memos::get_public_memo(&ctx.stores.vectors, &id).await?,
    ))
}
