//! Role repository (角色数据访问)

use uuid::Uuid;

use super::{PgStore, RoleRepository};
use crate::{
    error::{AppError, AppResult},
    models::{ids::RoleId, role::*},
};

impl RoleRepository for PgStore {
    // ==================== Roles ====================

    /// 列出所有角色
    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY name")
            .fetch_all(&self.db)
            .await?;

        Ok(roles)
    }

    /// 根据 ID 查找角色
    async fn find_role(&self, id: RoleId) -> AppResult<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(role)
    }

    /// 根据名称查找角色
    async fn find_role_by_name(&self, name: &str) -> AppResult<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE name = $1 ORDER BY guard_name LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.db)
        .await?;

        Ok(role)
    }

    /// 创建角色
    async fn create_role(&self, req: &CreateRoleRequest) -> AppResult<Role> {
        let role = sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (name, guard_name, scope, description)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&req.name)
        .bind(&req.guard_name)
        .bind(req.scope.as_str())
        .bind(&req.description)
        .fetch_one(&self.db)
        .await
        .map_err(AppError::from)
        .map_err(|e| {
            if e.is_unique_violation() {
                AppError::validation("A role with this name already exists")
            } else {
                e
            }
        })?;

        Ok(role)
    }

    /// 确保受保护角色存在（幂等）
    async fn ensure_protected_role(&self, name: &str) -> AppResult<Role> {
        let role = sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles (name, guard_name, scope, description, is_protected)
            VALUES ($1, 'web', 'platform', 'Unrestricted access to every module', TRUE)
            ON CONFLICT (name, guard_name) DO UPDATE SET is_protected = TRUE, updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(name)
        .fetch_one(&self.db)
        .await?;

        Ok(role)
    }

    /// 更新角色
    async fn update_role(&self, id: RoleId, req: &UpdateRoleRequest) -> AppResult<Option<Role>> {
        let role = sqlx::query_as::<_, Role>(
            r#"
            UPDATE roles
            SET
                name = COALESCE($2, name),
                description = COALESCE($3, description),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&req.name)
        .bind(&req.description)
        .fetch_optional(&self.db)
        .await?;

        Ok(role)
    }

    /// 删除角色（授权与持有者行随外键级联删除）
    async fn delete_role(&self, id: RoleId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== Holders ====================

    /// 为持有者分配角色（幂等）
    async fn assign_role(&self, role_id: RoleId, holder: &RoleHolder) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO model_has_roles (role_id, model_type, model_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(&holder.holder_type)
        .bind(holder.holder_id)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// 撤销持有者的角色
    async fn revoke_role(&self, role_id: RoleId, holder: &RoleHolder) -> AppResult<bool> {
        let result = sqlx::query(
            "DELETE FROM model_has_roles WHERE role_id = $1 AND model_type = $2 AND model_id = $3",
        )
        .bind(role_id)
        .bind(&holder.holder_type)
        .bind(holder.holder_id)
        .execute(&self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// 持有者拥有的全部角色
    async fn roles_of_holder(&self, holder: &RoleHolder) -> AppResult<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            r#"
            SELECT r.*
            FROM roles r
            JOIN model_has_roles mhr ON mhr.role_id = r.id
            WHERE mhr.model_id = $1 AND mhr.model_type = $2
            ORDER BY r.name
            "#,
        )
        .bind(holder.holder_id)
        .bind(&holder.holder_type)
        .fetch_all(&self.db)
        .await?;

        Ok(roles)
    }

    async fn holders_of_role(&self, role_id: RoleId) -> AppResult<Vec<RoleHolder>> {
        let rows = sqlx::query_as::<_, (String, Uuid)>(
            "SELECT model_type, model_id FROM model_has_roles WHERE role_id = $1 ORDER BY model_type, model_id",
        )
        .bind(role_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(holder_type, holder_id)| RoleHolder {
                holder_type,
                holder_id,
            })
            .collect())
    }
}
