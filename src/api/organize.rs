//! Tags and categories.

use axum::extract::State;

use super::extract::{AppJson, AppPath};
use crate::auth::AuthUser;
use crate::categories::{self, CreateCategoryRequest, UpdateCategoryRequest};
use crate::context::AppContext;
use crate::error::AppResult;
use crate::models::{Category, Tag};
use crate::response::ApiResponse;
use crate::tags::{self, UpdateTagRequest};

pub async fn list_tags(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> AppResult<ApiResponse<Vec<Tag>>> {
    Ok(ApiResponse::success(
        tags::list_tags(&ctx.stores.relational, &user).await?,
    ))
}

pub async fn update_tag(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
    AppJson(req): AppJson<UpdateTagRequest>,
) -> AppResult<ApiResponse<Tag>> {
    Ok(ApiResponse::success(
        tags::update_tag(&ctx, &user, &id, req).await?,
    ))
}

pub async fn delete_tag(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<()>> {
    tags::delete_tag(&ctx, &user, &id).await?;
    Ok(ApiResponse::success(()))
}

pub async fn list_categories(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> AppResult<ApiResponse<Vec<Category>>> {
    Ok(ApiResponse::success(
        categories::list_categories(&ctx.stores.vectors, &user).await?,
    ))
}

pub async fn create_category(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppJson(req): AppJson<CreateCategoryRequest>,
) -> AppResult<ApiResponse<Category>> {
    Ok(ApiResponse::success(
        categories::create_category(&ctx.stores.vectors, &user, req).await?,
    ))
}

pub async fn get_category(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<Category>> {
    Ok(ApiResponse::success(
        categories::get_category(&ctx.stores.vectors, &user, &id).await?,
    ))
}

pub async fn update_category(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
    AppJson(req): AppJson<UpdateCategoryRequest>,
) -> AppResult<ApiResponse<Category>> {
    Ok(ApiResponse::success(
        categories::update_category(&ctx.stores.vectors, &user, &id, req).await?,
    ))
}

pub async fn delete_category(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<()>> {
    categories::delete_category(&ctx.stores.vectors, &user, &id).await?;
    Ok(ApiResponse::success(()))
}
