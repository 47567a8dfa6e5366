//! User domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User account
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub department_id: Option<Uuid>,

    // Platform-wide bypass, equivalent to holding the protected super admin role
    pub is_super_admin: bool,
    // Per-user exception to the active device limit
    pub allow_multiple_devices: bool,

    // OAuth linkage
    pub oauth_provider: Option<String>,
    pub oauth_provider_id: Option<String>,

    // Account lock
    pub account_locked_at: Option<DateTime<Utc>>,
    pub locked_reason: Option<String>,

    // Login statistics
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    pub login_count: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_locked(&self) -> bool {
        self.account_locked_at.is_some()
    }
}

/// New user record
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub department_id: Option<Uuid>,
    pub is_super_admin: bool,
    pub allow_multiple_devices: bool,
}

/// User response (without sensitive information)
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub department_id: Option<Uuid>,
    pub is_super_admin: bool,
    pub account_locked: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub login_count: i32,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            department_id: user.department_id,
            is_super_admin: user.is_super_admin,
            account_locked: user.account_locked_at.is_some(),
            last_login_at: user.last_login_at,
            login_count: user.login_count,
        }
    }
}

/// Lock account request
#[derive(Debug, Deserialize)]
pub struct LockAccountRequest {
    pub reason: String,
}
