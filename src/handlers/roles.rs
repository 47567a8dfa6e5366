//! 角色管理的 HTTP 处理器

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::{
        ids::RoleId,
        role::{CreateRoleRequest, RoleHolder, RoleHolderRequest, UpdateRoleRequest},
    },
    repository::Store,
    services::policy::{self, core_actions},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// 列出角色
pub async fn list_roles<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::view_roles()).await?;

    let roles = state.role_service.list().await?;
    Ok(Json(json!({ "roles": roles, "count": roles.len() })))
}

/// 创建角色
pub async fn create_role<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Json(req): Json<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::manage_roles()).await?;

    let role = state.role_service.create(&req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "role": role }))))
}

/// 更新角色
pub async fn update_role<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(role_id): Path<RoleId>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::manage_roles()).await?;

    let role = state.role_service.update(role_id, &req).await?;
    Ok(Json(json!({ "role": role })))
}

/// 删除角色
pub async fn delete_role<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(role_id): Path<RoleId>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::manage_roles()).await?;

    state.role_service.delete(role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// 角色持有者
pub async fn list_holders<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(role_id): Path<RoleId>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::view_roles()).await?;

    let holders = state.role_service.holders(role_id).await?;
    Ok(Json(json!({ "holders": holders })))
}

/// 分配角色
pub async fn assign_holder<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(role_id): Path<RoleId>,
    Json(req): Json<RoleHolderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::assign_roles()).await?;

    let holder = RoleHolder::from(req);
    state.role_service.assign(role_id, &holder).await?;
    Ok((StatusCode::CREATED, Json(json!({ "holder": holder }))))
}

/// 收回角色
pub async fn revoke_holder<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(role_id): Path<RoleId>,
    Json(req): Json<RoleHolderRequest>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::assign_roles()).await?;

    state
        .role_service
        .revoke(role_id, &RoleHolder::from(req))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
