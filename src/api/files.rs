//! Attachments and OCR.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};

use super::extract::{AppJson, AppPath, AppQuery};
use crate::attachments::{self, ListAttachmentsQuery, UploadRequest};
use crate::auth::AuthUser;
use crate::context::AppContext;
use crate::error::AppResult;
use crate::models::Attachment;
use crate::ocr::{self, OcrRequest, OcrResult};
use crate::response::ApiResponse;

pub async fn list(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppQuery(query): AppQuery<ListAttachmentsQuery>,
) -> AppResult<ApiResponse<Vec<Attachment>>> {
    Ok(ApiResponse::success(
        attachments::list_attachments(&ctx.stores.vectors, &user, &query).await?,
    ))
}

pub async fn upload(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppJson(req): AppJson<UploadRequest>,
) -> AppResult<ApiResponse<Attachment>> {
    Ok(ApiResponse::success(
        attachments::upload(&ctx, &user, req).await?,
    ))
}

pub async fn get(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<Attachment>> {
    Ok(ApiResponse::success(
        attachments::get_attachment(&ctx.stores.vectors, &user, &id).await?,
    ))
}

/// Raw bytes with the stored content type; errors are still envelopes.
pub async fn content(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<Response> {
    let (attachment, bytes) = attachments::read_content(&ctx, &user, &id).await?;
    let disposition = format!(
        "inline; filename=\"{}\"",
        attachment.filename.replace(['"', '\r', '\n'], "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, attachment.content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

pub async fn delete(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppPath(id): AppPath<String>,
) -> AppResult<ApiResponse<()>> {
    attachments::delete_attachment(&ctx, &user, &id).await?;
    Ok(ApiResponse::success(()))
}

pub async fn recognize(
    State(ctx): State<AppContext>,
    user: AuthUser,
    AppJson(req): AppJson<OcrRequest>,
) -> AppResult<ApiResponse<OcrResult>> {
    Ok(ApiResponse::success(ocr::recognize(&ctx, &user, req).await?))
}
