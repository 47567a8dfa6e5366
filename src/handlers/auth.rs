//! 认证相关的 HTTP 处理器

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::{AppState, ClientIp},
    models::{auth::*, role::RoleHolder, user::UserResponse},
    repository::Store,
    services::auth_service::{ClientContext, SessionContext},
};
use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

/// 客户端设备 ID 请求头
pub const DEVICE_ID_HEADER: &str = "x-device-id";

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// 从客户端地址与请求头构造客户端上下文
pub fn client_context(ClientIp(ip): ClientIp, headers: &HeaderMap) -> ClientContext {
    ClientContext {
        ip: ip.map(|ip| ip.to_string()),
        user_agent: header_str(headers, "user-agent"),
        header_device_id: header_str(headers, DEVICE_ID_HEADER),
    }
}

/// 登录
pub async fn login<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    client_ip: ClientIp,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let client = client_context(client_ip, &headers);
    let response = state.auth_service.login(req, &client).await?;
    Ok(Json(response))
}

/// 登出：停用会话绑定的设备
pub async fn logout<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    client_ip: ClientIp,
    headers: HeaderMap,
    body: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let client = client_context(client_ip, &headers);
    let reported = body
        .and_then(|Json(req)| req.device_id)
        .or_else(|| client.header_device_id.clone());

    let session = SessionContext {
        user_id: auth_context.user_id(),
        session_id: auth_context.session_id,
        device_id: auth_context.device_id.clone(),
    };

    let response = state
        .auth_service
        .logout(&session, reported.as_deref(), &client)
        .await?;
    Ok(Json(response))
}

/// 当前用户
pub async fn me<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let roles = state
        .role_service
        .roles_of(&RoleHolder::user(auth_context.user_id()))
        .await?;
    let role_names: Vec<String> = roles.into_iter().map(|r| r.name).collect();

    Ok(Json(json!({
        "user": UserResponse::from(auth_context.user),
        "roles": role_names,
        "device_id": auth_context.device_id,
    })))
}

/// 本人的设备
pub async fn list_my_devices<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
) -> Result<impl IntoResponse, AppError> {
    let devices = state
        .account_service
        .my_devices(auth_context.user_id())
        .await?;
    Ok(Json(json!({ "devices": devices })))
}

/// 停用本人的某台设备
pub async fn deactivate_my_device<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let authorizer = state.authorization.authorizer(&auth_context.user);
    let device = state
        .account_service
        .deactivate_device(&authorizer, auth_context.user_id(), &device_id)
        .await?;
    Ok(Json(json!({ "device": device })))
}

#[derive(Debug, Deserialize)]
pub struct TrustRequest {
    pub trusted: bool,
}

/// 设置本人设备的受信标记
pub async fn set_device_trust<S: Store>(
    State(state): State<Arc<AppState<S>>>,
    auth_context: AuthContext,
    Path(device_id): Path<String>,
    Json(req): Json<TrustRequest>,
) -> Result<impl IntoResponse, AppError> {
    let device = state
        .account_service
        .set_trust(auth_context.user_id(), &device_id, req.trusted)
        .await?;
    Ok(Json(json!({ "device": device })))
}
