//! Authentication-related models

use serde::{Deserialize, Serialize};

use super::device::DeviceSummary;
use super::user::UserResponse;

/// Login request
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember: bool,
    /// Client-generated stable UUID; may also arrive as `X-Device-ID`
    pub device_id: Option<String>,
    pub device_name: Option<String>,
}

/// Login response
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub csrf_token: String,
    /// Raw device token, only present when it was issued or rotated by this login
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_token: Option<String>,
    pub device: DeviceSummary,
    pub user: UserResponse,
}

/// Logout request
#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    pub device_id: Option<String>,
}

/// Logout response
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub message: &'static str,
    pub csrf_token: String,
}
