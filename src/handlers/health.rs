//! 健康检查处理器
//! 提供 /health 和 /ready 端点

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::{db, middleware::AppState, repository::Store};

/// 存活探针响应
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// 就绪探针响应
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: Vec<HealthCheck>,
}

/// 健康检查项
#[derive(Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    fn healthy(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: "healthy".to_string(),
            message: None,
        }
    }

    fn unhealthy(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: "unhealthy".to_string(),
            message: Some(message),
        }
    }
}

static START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// 记录启动时间（在 main 中尽早调用）
pub fn set_start_time() {
    Lazy::force(&START_TIME);
}

/// 运行时间（秒）
pub fn get_uptime() -> u64 {
    START_TIME.elapsed().as_secs()
}

/// 存活探针
/// 快速响应，不检查依赖
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: get_uptime(),
    })
}

/// 就绪探针
/// 检查数据库连接与层级表结构
pub async fn readiness_check<S: Store>(State(state): State<Arc<AppState<S>>>) -> impl IntoResponse {
    let mut checks = Vec::new();

    if let Some(pool) = &state.db {
        checks.push(match db::health_check(pool).await {
            db::HealthStatus::Healthy => HealthCheck::healthy("database"),
            db::HealthStatus::Unhealthy(msg) => HealthCheck::unhealthy("database", msg),
        });
        db::record_pool_metrics(pool);
    }

    checks.push(match state.store.missing_hierarchy_tables().await {
        Ok(missing) if missing.is_empty() => HealthCheck::healthy("hierarchy_schema"),
        Ok(missing) => HealthCheck::unhealthy(
            "hierarchy_schema",
            format!("missing tables: {}", missing.join(", ")),
        ),
        Err(e) => HealthCheck::unhealthy("hierarchy_schema", e.to_string()),
    });

    let ready = checks.iter().all(|c| c.status == "healthy");
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(ReadinessResponse { ready, checks }))
}
