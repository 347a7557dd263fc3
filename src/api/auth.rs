use axum::extract::State;

use super::extract::AppJson;
use crate::auth::{self, AuthPayload, AuthUser, LoginRequest, RegisterRequest};
use crate::context::AppContext;
use crate::error::AppResult;
use crate::models::User;
use crate::response::ApiResponse;

pub async fn register(
    State(ctx): State<AppContext>,
    AppJson(req): AppJson<RegisterRequest>,
) -> AppResult<ApiResponse<AuthPayload>> {
    Ok(ApiResponse::success(auth::register(&ctx, req).await?))
}

pub async fn login(
    State(ctx): State<AppContext>,
    AppJson(req): AppJson<LoginRequest>,
) -> AppResult<ApiResponse<AuthPayload>> {
    Ok(ApiResponse::success(auth::login(&ctx, req).await?))
}

pub async fn me(State(ctx): State<AppContext>, user: AuthUser) -> AppResult<ApiResponse<User>> {
    Ok(ApiResponse::success(
        auth::find_user(&ctx.stores.relational, &user.id).await?,
    ))
}
