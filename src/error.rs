//! 统一错误模型
//! 定义所有错误类型和错误响应格式

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::device::DeviceSummary;

/// 结果类型别名
pub type AppResult<T> = std::result::Result<T, AppError>;

/// 设备绑定冲突详情（不包含设备令牌）
#[derive(Debug, Clone, Serialize)]
pub struct DeviceConflict {
    pub message: String,
    pub conflicting_device: DeviceSummary,
}

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account locked: {0}")]
    AccountLocked(String),

    #[error("Access denied")]
    Forbidden,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Too many login attempts, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Device conflict: {}", .0.message)]
    DeviceConflict(Box<DeviceConflict>),

    #[error("Duplicate grant (existing grant {existing_id})")]
    DuplicateGrant { existing_id: Uuid },

    #[error("Role is protected: {0}")]
    ProtectedRole(String),

    #[error("Module sync failed at {step}: {detail}")]
    SyncIntegrity { step: String, detail: String },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized | AppError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AppError::AccountLocked(_) => StatusCode::LOCKED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::DeviceConflict(_)
            | AppError::DuplicateGrant { .. }
            | AppError::ProtectedRole(_) => StatusCode::CONFLICT,
            AppError::Database(_)
            | AppError::Config(_)
            | AppError::SyncIntegrity { .. }
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Authentication failed".to_string(),
            // 邮箱不存在与密码错误使用同一条消息，防止账户枚举
            AppError::InvalidCredentials => "These credentials do not match our records".to_string(),
            AppError::AccountLocked(reason) => format!("Your account has been locked: {}", reason),
            AppError::Forbidden => "Access denied".to_string(),
            AppError::NotFound(msg) => format!("Resource not found: {}", msg),
            AppError::Validation(msg) => msg.clone(),
            AppError::RateLimited { retry_after_secs } => format!(
                "Too many login attempts. Please try again in {} seconds",
                retry_after_secs
            ),
            AppError::DeviceConflict(conflict) => conflict.message.clone(),
            AppError::DuplicateGrant { .. } => {
                "This role already has a grant for the selected node".to_string()
            }
            AppError::ProtectedRole(name) => format!("Role '{}' is protected", name),
            AppError::SyncIntegrity { step, .. } => format!("Module sync failed at {}", step),
            AppError::Database(_) => "Database error occurred".to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    // 便捷方法
    pub fn not_found(msg: &str) -> Self {
        AppError::NotFound(msg.to_string())
    }

    pub fn validation(msg: &str) -> Self {
        AppError::Validation(msg.to_string())
    }

    pub fn internal_error(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }

    pub fn sync_integrity(step: &str, detail: impl Into<String>) -> Self {
        AppError::SyncIntegrity {
            step: step.to_string(),
            detail: detail.into(),
        }
    }

    /// 唯一约束冲突（SQLSTATE 23505）
    pub fn is_unique_violation(&self) -> bool {
        match self {
            AppError::Database(sqlx::Error::Database(db)) => db.code().as_deref() == Some("23505"),
            _ => false,
        }
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflicting_device: Option<DeviceSummary>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = Uuid::new_v4().to_string();

        let (retry_after, blocked, conflicting_device) = match &self {
            AppError::RateLimited { retry_after_secs } => (Some(*retry_after_secs), None, None),
            AppError::DeviceConflict(conflict) => {
                (None, Some(true), Some(conflict.conflicting_device.clone()))
            }
            _ => (None, None, None),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.user_message(),
                request_id,
                retry_after,
                blocked,
                conflicting_device,
            },
        };

        if status.is_server_error() {
            tracing::error!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Application error"
            );
        } else {
            tracing::debug!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Request rejected"
            );
        }

        let mut response = (status, Json(error_response)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}
