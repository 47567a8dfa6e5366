//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};

use crate::{handlers, middleware::AppState, repository::Store};

/// 请求体上限（清单与授权批量写入足够）
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// 创建应用路由
pub fn create_router<S: Store>(state: Arc<AppState<S>>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check::<S>));

    // 登录（无需认证，限流在认证服务内按 IP 执行）
    let auth_routes = Router::new().route("/api/v1/auth/login", post(handlers::auth::login::<S>));

    // 需要认证的路由
    let authenticated_routes = Router::new()
        // 当前会话
        .route("/api/v1/auth/logout", post(handlers::auth::logout::<S>))
        .route("/api/v1/auth/me", get(handlers::auth::me::<S>))
        .route("/api/v1/auth/devices", get(handlers::auth::list_my_devices::<S>))
        .route(
            "/api/v1/auth/devices/{id}",
            delete(handlers::auth::deactivate_my_device::<S>),
        )
        .route(
            "/api/v1/auth/devices/{id}/trust",
            put(handlers::auth::set_device_trust::<S>),
        )

        // 模块层级
        .route("/api/v1/modules", get(handlers::modules::list_modules::<S>))
        .route(
            "/api/v1/modules/accessible",
            get(handlers::modules::accessible_modules::<S>),
        )

        // 授权检查与授权管理
        .route("/api/v1/access/check", post(handlers::access::check_access::<S>))
        .route("/api/v1/access/{id}", delete(handlers::access::revoke_access::<S>))
        .route(
            "/api/v1/roles/{id}/access",
            get(handlers::access::list_role_access::<S>)
                .post(handlers::access::grant_access::<S>)
                .put(handlers::access::replace_access::<S>),
        )

        // 角色
        .route(
            "/api/v1/roles",
            get(handlers::roles::list_roles::<S>).post(handlers::roles::create_role::<S>),
        )
        .route(
            "/api/v1/roles/{id}",
            put(handlers::roles::update_role::<S>).delete(handlers::roles::delete_role::<S>),
        )
        .route(
            "/api/v1/roles/{id}/holders",
            get(handlers::roles::list_holders::<S>)
                .post(handlers::roles::assign_holder::<S>)
                .delete(handlers::roles::revoke_holder::<S>),
        )

        // 账户与设备
        .route("/api/v1/users/{id}/lock", post(handlers::users::lock_account::<S>))
        .route("/api/v1/users/{id}/unlock", post(handlers::users::unlock_account::<S>))
        .route(
            "/api/v1/users/{id}/devices",
            get(handlers::users::list_user_devices::<S>),
        )
        .route(
            "/api/v1/users/{id}/devices/{device_id}/deactivate",
            post(handlers::users::deactivate_user_device::<S>),
        )

        // 认证事件
        .route(
            "/api/v1/audit/auth-events",
            get(handlers::audit::list_auth_events::<S>),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::middleware::session_auth_middleware::<S>,
        ));

    // 组合所有路由
    Router::new()
        .merge(public_routes)
        .merge(auth_routes)
        .merge(authenticated_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::ip_whitelist_middleware::<S>,
        ))
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
                .layer(CorsLayer::new()),
        )
        .with_state(state)
}
