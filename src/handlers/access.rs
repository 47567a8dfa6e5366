//! 授权检查与角色授权管理的 HTTP 处理器

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::{
        ids::{GrantId, RoleId},
        module::ActionPath,
        role::{GrantAccessRequest, ReplaceAccessRequest},
    },
    repository::Store,
    services::{
        authorization_service::RecordScope,
        policy::{self, core_actions},
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct CheckAccessRequest {
    /// `module.sub_module.component.action`
    pub action: String,
    /// 给出时按授权范围判断该记录
    pub record: Option<RecordScope>,
}

/// 当前用户能否执行某个动作
pub async fn check_access<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Json(req): Json<CheckAccessRequest>,
) -> Result<impl IntoResponse, AppError> {
    let path: ActionPath = req
        .action
        .parse()
        .map_err(|e: crate::models::ParseEnumError| AppError::Validation(e.to_string()))?;

    let authorizer = state.authorization.authorizer(&auth_context.user);
    let decision = authorizer.decide(&path).await?;
    let allowed = match &req.record {
        Some(record) => authorizer.can_with_scope(&path, record).await?,
        None => decision.is_allowed(),
    };

    Ok(Json(json!({
        "action": path.to_string(),
        "allowed": allowed,
        "decision": decision,
    })))
}

/// 角色的授权列表
pub async fn list_role_access<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(role_id): Path<RoleId>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::view_role_access()).await?;

    let grants = state.access_service.list(role_id).await?;
    Ok(Json(json!({ "grants": grants })))
}

/// 新增授权
pub async fn grant_access<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(role_id): Path<RoleId>,
    Json(req): Json<GrantAccessRequest>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::manage_role_access()).await?;

    let grant = state.access_service.grant(role_id, &req).await?;
    Ok((StatusCode::CREATED, Json(json!({ "grant": grant }))))
}

/// 整体替换角色授权
pub async fn replace_access<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(role_id): Path<RoleId>,
    Json(req): Json<ReplaceAccessRequest>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::manage_role_access()).await?;

    let grants = state.access_service.replace(role_id, &req.grants).await?;
    Ok(Json(json!({ "grants": grants })))
}

/// 撤销授权
pub async fn revoke_access<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(grant_id): Path<GrantId>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::manage_role_access()).await?;

    let grant = state.access_service.revoke(grant_id).await?;
    Ok(Json(json!({ "revoked": grant })))
}
