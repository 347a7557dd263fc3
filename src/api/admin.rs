//! Backup and system endpoints.

use axum::extract::State;
use serde::Serialize;

use crate::auth::{AdminUser, AuthUser};
use crate::backup::{BackupSet, BackupStatus, CleanupReport};
use crate::context::AppContext;
use crate::error::AppResult;
use crate::response::ApiResponse;
use crate::system::{self, SystemInfo, UserStats};

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health() -> ApiResponse<Health> {
    ApiResponse::success(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn info(State(ctx): State<AppContext>, _user: AuthUser) -> ApiResponse<SystemInfo> {
    ApiResponse::success(system::info(&ctx))
}

pub async fn stats(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> AppResult<ApiResponse<UserStats>> {
    Ok(ApiResponse::success(system::stats(&ctx, &user).await?))
}

pub async fn backup_status(
    State(ctx): State<AppContext>,
    _admin: AdminUser,
) -> AppResult<ApiResponse<BackupStatus>> {
    Ok(ApiResponse::success(ctx.backup.status().await?))
}

pub async fn backup_force(
    State(ctx): State<AppContext>,
    AdminUser(user): AdminUser,
) -> AppResult<ApiResponse<BackupSet>> {
    tracing::info!(user = %user.username, "manual backup requested");
    Ok(ApiResponse::success(ctx.backup.run().await?))
}

pub async fn backup_cleanup(
    State(ctx): State<AppContext>,
    AdminUser(user): AdminUser,
) -> AppResult<ApiResponse<CleanupReport>> {
    tracing::info!(user = %user.username, "backup cleanup requested");
    Ok(ApiResponse::success(ctx.backup.cleanup().await?))
}
