//! 模块层级的 HTTP 处理器

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::module::SyncScope,
    repository::Store,
    services::policy::{self, core_actions},
};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ModuleTreeQuery {
    pub scope: Option<SyncScope>,
}

/// 完整模块树（管理端）
pub async fn list_modules<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Query(query): Query<ModuleTreeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::view_modules()).await?;

    let modules = state
        .store
        .module_tree(query.scope.unwrap_or(SyncScope::All))
        .await?;
    Ok(Json(json!({ "modules": modules })))
}

/// 当前用户可访问的导航树
pub async fn accessible_modules<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    let modules = authorizer.accessible_tree().await?;
    Ok(Json(json!({ "modules": modules })))
}
