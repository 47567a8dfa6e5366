//! 角色管理服务
//!
//! 超级管理员角色在启动时确保存在并标记为受保护，之后不能被修改或删除。

use crate::{
    error::{AppError, AppResult},
    models::{
        ids::RoleId,
        role::{CreateRoleRequest, Role, RoleHolder, UpdateRoleRequest},
    },
    repository::Store,
};

pub struct RoleService<S> {
    store: S,
}

impl<S: Store> RoleService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// 确保超级管理员角色存在且受保护
    pub async fn ensure_super_admin_role(&self, name: &str) -> AppResult<Role> {
        let role = self.store.ensure_protected_role(name).await?;
        tracing::info!(role = %role.name, role_id = %role.id, "Super admin role ensured");
        Ok(role)
    }

    pub async fn list(&self) -> AppResult<Vec<Role>> {
        self.store.list_roles().await
    }

    pub async fn get(&self, id: RoleId) -> AppResult<Role> {
        self.store
            .find_role(id)
            .await?
            .ok_or_else(|| AppError::not_found("role"))
    }

    pub async fn create(&self, req: &CreateRoleRequest) -> AppResult<Role> {
        if req.name.trim().is_empty() {
            return Err(AppError::validation("Role name must not be empty"));
        }
        let role = self.store.create_role(req).await?;
        tracing::info!(role = %role.name, role_id = %role.id, "Role created");
        Ok(role)
    }

    pub async fn update(&self, id: RoleId, req: &UpdateRoleRequest) -> AppResult<Role> {
        let role = self.get(id).await?;
        if role.is_protected {
            return Err(AppError::ProtectedRole(role.name));
        }
        if req.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(AppError::validation("Role name must not be empty"));
        }

        self.store
            .update_role(id, req)
            .await?
            .ok_or_else(|| AppError::not_found("role"))
    }

    /// 删除角色及其授权与持有关系
    pub async fn delete(&self, id: RoleId) -> AppResult<()> {
        let role = self.get(id).await?;
        if role.is_protected {
            return Err(AppError::ProtectedRole(role.name));
        }

        self.store.delete_role(id).await?;
        tracing::info!(role = %role.name, role_id = %id, "Role deleted");
        Ok(())
    }

    pub async fn assign(&self, id: RoleId, holder: &RoleHolder) -> AppResult<()> {
        self.store.assign_role(id, holder).await?;
        tracing::info!(
            role_id = %id,
            holder_type = %holder.holder_type,
            holder_id = %holder.holder_id,
            "Role assigned"
        );
        Ok(())
    }

    pub async fn revoke(&self, id: RoleId, holder: &RoleHolder) -> AppResult<()> {
        if self.store.revoke_role(id, holder).await? {
            Ok(())
        } else {
            Err(AppError::not_found("role assignment"))
        }
    }

    pub async fn holders(&self, id: RoleId) -> AppResult<Vec<RoleHolder>> {
        self.get(id).await?;
        self.store.holders_of_role(id).await
    }

    pub async fn roles_of(&self, holder: &RoleHolder) -> AppResult<Vec<Role>> {
        self.store.roles_of_holder(holder).await
    }
}
