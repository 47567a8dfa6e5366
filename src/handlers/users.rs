//! 账户管理的 HTTP 处理器

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::{
        device::DeviceSummary,
        user::{LockAccountRequest, UserResponse},
    },
    repository::Store,
    services::policy::{self, core_actions},
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// 锁定账户
pub async fn lock_account<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(req): Json<LockAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    let user = state
        .account_service
        .lock(&authorizer, user_id, &req.reason)
        .await?;
    Ok(Json(json!({ "user": UserResponse::from(user) })))
}

/// 解锁账户
pub async fn unlock_account<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    let user = state.account_service.unlock(&authorizer, user_id).await?;
    Ok(Json(json!({ "user": UserResponse::from(user) })))
}

/// 某个用户的设备
pub async fn list_user_devices<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let target = state
        .store
        .find_user(user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;

    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require_record(&authorizer, &core_actions::view_devices(), &target).await?;

    let devices: Vec<DeviceSummary> = state.account_service.my_devices(target.id).await?;
    Ok(Json(json!({ "devices": devices })))
}

/// 停用某个用户的设备
pub async fn deactivate_user_device<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path((user_id, device_id)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    let device = state
        .account_service
        .deactivate_device(&authorizer, user_id, &device_id)
        .await?;
    Ok(Json(json!({ "device": device })))
}
