//! 角色授权管理服务
//!
//! 层级 ID 在租户部署中指向中心库，没有外键约束，写入前由这里校验节点存在。

use std::collections::HashSet;

use crate::{
    error::{AppError, AppResult},
    models::{
        ids::{GrantId, RoleId},
        role::{GrantAccessRequest, GrantSpec, Role, RoleModuleAccess},
    },
    repository::Store,
};

pub struct AccessService<S> {
    store: S,
}

impl<S: Store> AccessService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    async fn role(&self, role_id: RoleId) -> AppResult<Role> {
        self.store
            .find_role(role_id)
            .await?
            .ok_or_else(|| AppError::not_found("role"))
    }

    /// 受保护角色的授权不可修改
    async fn mutable_role(&self, role_id: RoleId) -> AppResult<Role> {
        let role = self.role(role_id).await?;
        if role.is_protected {
            return Err(AppError::ProtectedRole(role.name));
        }
        Ok(role)
    }

    async fn ensure_node_exists(&self, grant: &GrantSpec) -> AppResult<()> {
        if self.store.node_exists(grant.node).await? {
            Ok(())
        } else {
            Err(AppError::Validation(format!(
                "Hierarchy node {:?} does not exist",
                grant.node
            )))
        }
    }

    /// 角色的全部授权
    pub async fn list(&self, role_id: RoleId) -> AppResult<Vec<RoleModuleAccess>> {
        self.role(role_id).await?;
        self.store.grants_for_roles(&[role_id]).await
    }

    /// 新增授权；同一角色同一节点已有授权时按写入模式拒绝或覆盖
    pub async fn grant(
        &self,
        role_id: RoleId,
        req: &GrantAccessRequest,
    ) -> AppResult<RoleModuleAccess> {
        let role = self.mutable_role(role_id).await?;
        self.ensure_node_exists(&req.grant).await?;

        let grant = self.store.insert_grant(role_id, req.grant, req.mode).await?;

        tracing::info!(
            role = %role.name,
            grant_id = %grant.id,
            hierarchy_level = ?grant.node.level(),
            access_scope = %grant.access_scope,
            "Grant written"
        );
        Ok(grant)
    }

    /// 撤销授权
    pub async fn revoke(&self, grant_id: GrantId) -> AppResult<RoleModuleAccess> {
        let Some(grant) = self.store.find_grant_by_id(grant_id).await? else {
            return Err(AppError::not_found("grant"));
        };
        self.mutable_role(grant.role_id).await?;

        let removed = self
            .store
            .delete_grant(grant_id)
            .await?
            .ok_or_else(|| AppError::not_found("grant"))?;

        tracing::info!(grant_id = %grant_id, role_id = %removed.role_id, "Grant revoked");
        Ok(removed)
    }

    /// 整体替换角色的授权（单个事务）
    pub async fn replace(
        &self,
        role_id: RoleId,
        grants: &[GrantSpec],
    ) -> AppResult<Vec<RoleModuleAccess>> {
        let role = self.mutable_role(role_id).await?;

        let mut nodes = HashSet::new();
        for grant in grants {
            if !nodes.insert(grant.node) {
                return Err(AppError::Validation(format!(
                    "Hierarchy node {:?} is listed more than once",
                    grant.node
                )));
            }
            self.ensure_node_exists(grant).await?;
        }

        let stored = self.store.replace_grants(role_id, grants).await?;
        tracing::info!(role = %role.name, grants = stored.len(), "Role access replaced");
        Ok(stored)
    }
}
