//! Response envelope and error-code taxonomy.
//!
//! Every API body is shaped as `{ "code": i32, "msg": string, "data": T | null }`.
//! `code = 0` is success; every other value comes from [`ErrorCode`], which
//! carries a default human-readable message that call sites may override.
//!
//! # Code ranges
//!
//! | Range | Domain |
//! |-------|--------|
//! | `0` | success |
//! | `400`–`502` | params, auth, not-found, conflict, system |
//! | `1000`–`1099` | users and sessions |
//! | `2000`–`2099` | memos |
//! | `3000`–`3099` | tags |
//! | `4000`–`4099` | categories |
//! | `5000`–`5099` | push rules and webhooks |
//! | `6000`–`6099` | attachments and object storage |
//! | `7000`–`7199` | OCR and AI |
//! | `8000`–`8099` | backups |
//! | `9000` | schema migrations |
//!
//! Business failures travel as HTTP 200 with a nonzero `code`; only
//! transport-level failures (unmatched route, panic) use other statuses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

macro_rules! error_codes {
    ($($name:ident = $code:expr, $msg:expr;)+) => {
        /// Fixed, client-visible error codes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(non_camel_case_types)]
        pub enum ErrorCode {
            $($name,)+
        }

        impl ErrorCode {
            /// All codes in declaration order.
            pub const ALL: &'static [ErrorCode] = &[$(ErrorCode::$name,)+];

            /// The integer sent in the envelope.
            pub fn code(self) -> i32 {
                match self {
                    $(ErrorCode::$name => $code,)+
                }
            }

            /// Default message used when a call site supplies none.
            pub fn default_message(self) -> &'static str {
                match self {
                    $(ErrorCode::$name => $msg,)+
                }
            }

            /// Look up a code by its integer value.
            pub fn from_code(code: i32) -> Option<ErrorCode> {
                match code {
                    $(c if c == $code => Some(ErrorCode::$name),)+
                    _ => None,
                }
            }
        }
    };
}

error_codes! {
    SUCCESS = 0, "操作成功";

    PARAMS_ERROR = 400, "参数错误";
    UNAUTHORIZED = 401, "未登录或登录已失效";
    FORBIDDEN = 403, "无权访问";
    NOT_FOUND = 404, "资源不存在";
    METHOD_NOT_ALLOWED = 405, "请求方法不支持";
    REQUEST_TIMEOUT = 408, "请求超时";
    CONFLICT = 409, "资源冲突";
    SYSTEM_ERROR = 500, "系统错误";
    DATABASE_ERROR = 501, "数据库错误";
    EXTERNAL_SERVICE_ERROR = 502, "外部服务调用失败";

    USER_NOT_FOUND = 1000, "用户不存在";
    USER_ALREADY_EXISTS = 1001, "用户名已存在";
    PASSWORD_ERROR = 1002, "密码错误";
    TOKEN_INVALID = 1003, "登录凭证无效";
    TOKEN_EXPIRED = 1004, "登录凭证已过期";
    REGISTRATION_DISABLED = 1005, "注册功能已关闭";

    MEMO_NOT_FOUND = 2000, "笔记不存在";
    MEMO_CONTENT_EMPTY = 2001, "笔记内容不能为空";

    TAG_NOT_FOUND = 3000, "标签不存在";
    TAG_ALREADY_EXISTS = 3001, "标签已存在";

    CATEGORY_NOT_FOUND = 4000, "分类不存在";
    CATEGORY_ALREADY_EXISTS = 4001, "分类名称已存在";

    PUSH_RULE_NOT_FOUND = 5000, "推送规则不存在";
    WEBHOOK_DELIVERY_FAILED = 5001, "推送发送失败";

    ATTACHMENT_NOT_FOUND = 6000, "附件不存在";
    FILE_TOO_LARGE = 6001, "文件过大";
    STORAGE_ERROR = 6002, "存储服务错误";

    OCR_FAILED = 7000, "文字识别失败";
    AI_SERVICE_ERROR = 7100, "AI 服务调用失败";
    AI_DISABLED = 7101, "AI 功能未启用";
    CONVERSATION_NOT_FOUND = 7102, "对话不存在";

    BACKUP_FAILED = 8000, "备份失败";
    BACKUP_IN_PROGRESS = 8001, "备份正在进行中";

    MIGRATION_FAILED = 9000, "数据库迁移失败";
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> i32 {
        code.code()
    }
}

/// The uniform `{code, msg, data}` wrapper.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// `{code: 0, msg: "操作成功", data}`.
    pub fn success(data: T) -> Self {
        Self {
            code: ErrorCode::SUCCESS.code(),
            msg: ErrorCode::SUCCESS.default_message().to_string(),
            data: Some(data),
        }
    }

    pub fn success_with_msg(data: T, msg: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::SUCCESS.code(),
            msg: msg.into(),
            data: Some(data),
        }
    }

    /// Error envelope with `data: null`.
    ///
    /// The message is `msg` when given, otherwise the default for `code`,
    /// otherwise the system-error default (for integers outside the taxonomy).
    pub fn error(code: impl Into<i32>, msg: Option<String>) -> Self {
        let code = code.into();
        let msg = msg.unwrap_or_else(|| {
            ErrorCode::from_code(code)
                .unwrap_or(ErrorCode::SYSTEM_ERROR)
                .default_message()
                .to_string()
        });
        Self {
            code,
            msg,
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == ErrorCode::SUCCESS.code()
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Envelope with a non-200 transport status, for unmatched routes and panics.
pub fn transport_error(status: StatusCode, code: ErrorCode) -> Response {
    (status, Json(ApiResponse::<()>::error(code, None))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope() {
        let resp = ApiResponse::success(json!({"id": "m1"}));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({"code": 0, "msg": "操作成功", "data": {"id": "m1"}})
        );
        assert!(resp.is_success());
    }

    #[test]
    fn test_error_uses_default_message() {
        let resp = ApiResponse::<()>::error(ErrorCode::USER_NOT_FOUND, None);
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value, json!({"code": 1000, "msg": "用户不存在", "data": null}));
    }

    #[test]
    fn test_error_message_override() {
        let resp = ApiResponse::<()>::error(ErrorCode::PARAMS_ERROR, Some("title too long".into()));
        assert_eq!(resp.code, 400);
        assert_eq!(resp.msg, "title too long");
        assert!(resp.data.is_none());
    }

    #[test]
    fn test_unknown_code_falls_back_to_system_message() {
        let resp = ApiResponse::<()>::error(123_456, None);
        assert_eq!(resp.code, 123_456);
        assert_eq!(resp.msg, ErrorCode::SYSTEM_ERROR.default_message());
    }

    #[test]
    fn test_codes_are_unique_and_round_trip() {
        let mut seen = std::collections::HashSet::new();
        for code in ErrorCode::ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
            assert_eq!(ErrorCode::from_code(code.code()), Some(*code));
        }
        assert_eq!(ErrorCode::from_code(-7), None);
    }
}
