use axum::extract::State;

use super::extract::{AppJson, AppPath};
use crate::auth::AuthUser;
use crate::context::AppContext;
use crate::conversations::{
    self, ConversationDetail, CreateConversationRequest, Exchange, SendMessageRequest,
};
use crate::error::AppResult;
use crate::models::Conversation;
use crate::response::ApiResponse;

pub async fn list(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> AppResult<ApiResponse<Vec<Conversation>>> {
    Ok(ApiResponse::success(
        conversations::list_conversations(&ctx.stores.vectors, &user).await?,
    ))
}

pub async fn create(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppJson(req): AppJson<CreateConversationRequest>,
) -> AppResult<ApiResponse<Conversation>> {
    Ok(ApiResponse::success(
        conversations::create_conversation(&ctx.stores.vectors, &user, req).await?,
    ))
}

pub async fn get(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<ConversationDetail>> {
    Ok(ApiResponse::success(
        conversations::get_detail(&ctx.stores.vectors, &user, &id).await?,
    ))
}

pub async fn delete(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<()>> {
    conversations::delete_conversation(&ctx.stores.vectors, &user, &id).await?;
    Ok(ApiResponse::success(()))
}

pub async fn send(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
    AppJson(req): AppJson<SendMessageRequest>,
) -> AppResult<ApiResponse<Exchange>> {
    Ok(ApiResponse::success(
        conversations::send_message(&ctx, &user, &id, req).await?,
    ))
}
