//! Text extraction from images through the vision model.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::attachments::{decode_payload, read_content};
use crate::auth::AuthUser;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::response::ErrorCode;

/// Either an existing attachment or an inline image.
#[derive(Debug, Deserialize)]
pub struct OcrRequest {
    #[serde(default)]
    pub attachment_id: Option<String>,
    /// Base64 image or `data:` URL.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OcrResult {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
}

const OCR_PROMPT: &str = "Transcribe all text in this image exactly as written. \
     Keep line breaks. Reply with the text only, or an empty reply if there is none.";

/// Run OCR; text from an attachment is saved on it.
pub async fn recognize(ctx: &AppContext, user: &AuthUser, req: OcrRequest) -> AppResult<OcrResult> {
    if !ctx.ai.is_enabled() {
        return Err(AppError::business(ErrorCode::AI_DISABLED));
    }

    let (bytes, content_type, attachment_id) = match (req.attachment_id, req.image) {
        (Some(id), None) => {
            let (attachment, bytes) = read_content(ctx, user, &id).await?;
            (bytes, attachment.content_type, Some(id))
        }
        (None, Some(image)) => {
            let (bytes, url_mime) = decode_payload(&image)?;
            let content_type = req
                .content_type
                .or(url_mime)
                .unwrap_or_else(|| "image/png".to_string());
            (bytes, content_type, None)
        }
        _ => {
            return Err(AppError::Validation(
                "exactly one of attachment_id or image is required".into(),
            ))
        }
    };

    if !content_type.starts_with("image/") {
        return Err(AppError::Validation(format!(
            "OCR needs an image, got {}",
            content_type
        )));
    }
    if bytes.len() > ctx.config.storage.max_upload_bytes {
        return Err(AppError::business(ErrorCode::FILE_TOO_LARGE));
    }

    let data_url = format!("data:{};base64,{}", content_type, STANDARD.encode(&bytes));
    let text = ctx
        .ai
        .vision(OCR_PROMPT, &data_url)
        .await
        .map_err(|e| AppError::business_msg(ErrorCode::OCR_FAILED, e.to_string()))?;

    if let Some(ref id) = attachment_id {
        sqlx::query("UPDATE attachments SET ocr_text = ? WHERE id = ? AND user_id = ?")
            .bind(&text)
            .bind(id)
            .bind(&user.id)
            .execute(&ctx.stores.vectors)
            .await?;
    }

    Ok(OcrResult {
        text,
        attachment_id,
    })
}
