//! 认证事件的 HTTP 处理器

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::AppState,
    models::audit::AuthEventFilters,
    repository::Store,
    services::policy::{self, core_actions},
};
use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// 查询认证事件
pub async fn list_auth_events<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Query(filters): Query<AuthEventFilters>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    policy::require(&authorizer, &core_actions::view_auth_events()).await?;

    let events = state.audit_service.query(&filters).await?;
    Ok(Json(json!({
        "events": events,
        "count": events.len(),
    })))
}
