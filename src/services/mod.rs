//! 业务逻辑层

pub mod access_service;
pub mod account_service;
pub mod audit_service;
pub mod auth_service;
pub mod authorization_service;
pub mod device_policy;
pub mod discovery;
pub mod login_throttle;
pub mod policy;
pub mod role_service;
pub mod sync_plan;
pub mod sync_service;

pub use access_service::AccessService;
pub use account_service::AccountService;
pub use audit_service::AuditService;
pub use auth_service::AuthService;
pub use authorization_service::{AuthorizationService, Authorizer, Decision};
pub use login_throttle::LoginThrottle;
pub use role_service::RoleService;
pub use sync_service::SyncService;
