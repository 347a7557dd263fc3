use axum::extract::State;
use serde::Deserialize;

use super::extract::{AppJson, AppPath, AppQuery};
use crate::auth::AuthUser;
use crate::context::AppContext;
use crate::error::AppResult;
use crate::models::{PushDelivery, PushRule};
use crate::push::{self, CreateRuleRequest, UpdateRuleRequest};
use crate::response::ApiResponse;

#[derive(Debug, Deserialize)]
pub struct DeliveriesQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

pub async fn list(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> AppResult<ApiResponse<Vec<PushRule>>> {
    Ok(ApiResponse::success(
        push::list_rules(&ctx.stores.relational, &user).await?,
    ))
}

pub async fn create(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppJson(req): AppJson<CreateRuleRequest>,
) -> AppResult<ApiResponse<PushRule>> {
    Ok(ApiResponse::success(
        push::create_rule(&ctx.stores.relational, &user, req).await?,
    ))
}

pub async fn get(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<PushRule>> {
    Ok(ApiResponse::success(
        push::get_rule(&ctx.stores.relational, &user, &id).await?,
    ))
}

pub async fn update(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
    AppJson(req): AppJson<UpdateRuleRequest>,
) -> AppResult<ApiResponse<PushRule>> {
    Ok(ApiResponse::success(
        push::update_rule(&ctx.stores.relational, &user, &id, req).await?,
    ))
}

pub async fn delete(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<()>> {
    push::delete_rule(&ctx.stores.relational, &user, &id).await?;
    Ok(ApiResponse::success(()))
}

pub async fn test(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<PushDelivery>> {
    Ok(ApiResponse::success(
        push::test_rule(&ctx.stores.relational, &ctx.push, &user, &id).await?,
    ))
}

pub async fn deliveries(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
    AppQuery(query): AppQuery<DeliveriesQuery>,
) -> AppResult<ApiResponse<Vec<PushDelivery>>> {
    Ok(ApiResponse::success(
        push::list_deliveries(&ctx.stores.relational, &user, &id, query.limit).await?,
    ))
}
