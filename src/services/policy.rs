//! 资源策略辅助
//!
//! 所有者快捷通道在调用决策引擎之前判断：用户总能处理自己的记录。
//! 快捷通道不属于引擎本身，引擎只负责授权层级与范围。

use crate::{
    error::{AppError, AppResult},
    models::module::ActionPath,
    repository::Store,
    services::authorization_service::{Authorizer, MembershipResolver, ScopedRecord},
};

/// 记录属于当前用户时直接放行，否则交给引擎做带范围的检查
pub async fn owner_or_authorized<S, M, R>(
    authorizer: &Authorizer<'_, S, M>,
    path: &ActionPath,
    record: &R,
) -> AppResult<bool>
where
    S: Store,
    M: MembershipResolver + Sync,
    R: ScopedRecord + Sync,
{
    if record.owner_id() == Some(authorizer.user().id) {
        return Ok(true);
    }
    authorizer.can_with_scope(path, record).await
}

/// 无记录的门禁检查，拒绝时返回 `Forbidden`
pub async fn require<S, M>(authorizer: &Authorizer<'_, S, M>, path: &ActionPath) -> AppResult<()>
where
    S: Store,
    M: MembershipResolver + Sync,
{
    if authorizer.can(path).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// 带记录的门禁检查（含所有者快捷通道），拒绝时返回 `Forbidden`
pub async fn require_record<S, M, R>(
    authorizer: &Authorizer<'_, S, M>,
    path: &ActionPath,
    record: &R,
) -> AppResult<()>
where
    S: Store,
    M: MembershipResolver + Sync,
    R: ScopedRecord + Sync,
{
    if owner_or_authorized(authorizer, path, record).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// 内置 `core` 模块声明的管理动作
pub mod core_actions {
    use crate::models::module::ActionPath;

    const MODULE: &str = "core";

    fn path(sub_module: &str, component: &str, action: &str) -> ActionPath {
        ActionPath::new(MODULE, sub_module, component, action)
    }

    pub fn view_modules() -> ActionPath {
        path("access-control", "modules", "view")
    }

    pub fn view_roles() -> ActionPath {
        path("access-control", "roles", "view")
    }

    pub fn assign_roles() -> ActionPath {
        path("access-control", "roles", "assign")
    }

    pub fn manage_roles() -> ActionPath {
        path("access-control", "roles", "manage")
    }

    pub fn view_role_access() -> ActionPath {
        path("access-control", "role-access", "view")
    }

    pub fn manage_role_access() -> ActionPath {
        path("access-control", "role-access", "manage")
    }

    pub fn view_devices() -> ActionPath {
        path("security", "user-devices", "view")
    }

    pub fn deactivate_devices() -> ActionPath {
        path("security", "user-devices", "deactivate")
    }

    pub fn lock_accounts() -> ActionPath {
        path("security", "accounts", "lock")
    }

    pub fn unlock_accounts() -> ActionPath {
        path("security", "accounts", "unlock")
    }

    pub fn view_auth_events() -> ActionPath {
        path("security", "auth-events", "view")
    }
}
