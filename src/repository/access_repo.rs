//! Role-module-access repository (授权数据访问)

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use super::{AccessRepository, PgStore};
use crate::{
    error::{AppError, AppResult},
    models::{
        ids::{ActionId, ComponentId, GrantId, ModuleId, RoleId, SubModuleId},
        module::HierarchyRef,
        role::{AccessScope, GrantSpec, GrantWriteMode, RoleModuleAccess},
    },
};

/// `role_module_access` 原始行
#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    id: GrantId,
    role_id: RoleId,
    module_id: Option<ModuleId>,
    sub_module_id: Option<SubModuleId>,
    component_id: Option<ComponentId>,
    action_id: Option<ActionId>,
    #[sqlx(try_from = "String")]
    access_scope: AccessScope,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<GrantRow> for RoleModuleAccess {
    type Error = AppError;

    fn try_from(row: GrantRow) -> Result<Self, Self::Error> {
        let node = HierarchyRef::from_columns(
            row.module_id,
            row.sub_module_id,
            row.component_id,
            row.action_id,
        )
        .ok_or_else(|| AppError::Internal(format!("grant {} does not reference exactly one node", row.id)))?;

        Ok(RoleModuleAccess {
            id: row.id,
            role_id: row.role_id,
            node,
            access_scope: row.access_scope,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_grants(rows: Vec<GrantRow>) -> AppResult<Vec<RoleModuleAccess>> {
    rows.into_iter().map(RoleModuleAccess::try_from).collect()
}

async fn insert_row(
    conn: &mut PgConnection,
    role_id: RoleId,
    grant: GrantSpec,
    upsert: bool,
) -> Result<GrantRow, sqlx::Error> {
    let (module_id, sub_module_id, component_id, action_id) = grant.node.to_columns();
    let sql = if upsert {
        r#"
        INSERT INTO role_module_access (role_id, module_id, sub_module_id, component_id, action_id, access_scope)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT ON CONSTRAINT role_module_access_unique
        DO UPDATE SET access_scope = EXCLUDED.access_scope, updated_at = NOW()
        RETURNING *
        "#
    } else {
        r#"
        INSERT INTO role_module_access (role_id, module_id, sub_module_id, component_id, action_id, access_scope)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#
    };

    sqlx::query_as::<_, GrantRow>(sql)
        .bind(role_id)
        .bind(module_id)
        .bind(sub_module_id)
        .bind(component_id)
        .bind(action_id)
        .bind(grant.access_scope.as_str())
        .fetch_one(conn)
        .await
}

impl AccessRepository for PgStore {
    /// 一组角色的全部授权（每个请求只查一次）
    async fn grants_for_roles(&self, role_ids: &[RoleId]) -> AppResult<Vec<RoleModuleAccess>> {
        if role_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = role_ids.iter().map(|id| id.as_uuid()).collect();
        let rows = sqlx::query_as::<_, GrantRow>(
            "SELECT * FROM role_module_access WHERE role_id = ANY($1) ORDER BY created_at",
        )
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;

        into_grants(rows)
    }

    async fn find_grant_by_id(&self, id: GrantId) -> AppResult<Option<RoleModuleAccess>> {
        let row = sqlx::query_as::<_, GrantRow>("SELECT * FROM role_module_access WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(RoleModuleAccess::try_from).transpose()
    }

    async fn find_grant(
        &self,
        role_id: RoleId,
        node: HierarchyRef,
    ) -> AppResult<Option<RoleModuleAccess>> {
        let (module_id, sub_module_id, component_id, action_id) = node.to_columns();
        let row = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT * FROM role_module_access
            WHERE role_id = $1
              AND module_id IS NOT DISTINCT FROM $2
              AND sub_module_id IS NOT DISTINCT FROM $3
              AND component_id IS NOT DISTINCT FROM $4
              AND action_id IS NOT DISTINCT FROM $5
            "#,
        )
        .bind(role_id)
        .bind(module_id)
        .bind(sub_module_id)
        .bind(component_id)
        .bind(action_id)
        .fetch_optional(&self.db)
        .await?;

        row.map(RoleModuleAccess::try_from).transpose()
    }

    async fn insert_grant(
        &self,
        role_id: RoleId,
        grant: GrantSpec,
        mode: GrantWriteMode,
    ) -> AppResult<RoleModuleAccess> {
        let mut conn = self.db.acquire().await?;
        let upsert = mode == GrantWriteMode::Upsert;

        match insert_row(&mut conn, role_id, grant, upsert).await {
            Ok(row) => RoleModuleAccess::try_from(row),
            Err(e) => {
                let err = AppError::from(e);
                if !err.is_unique_violation() {
                    return Err(err);
                }
                // 唯一约束冲突：带上已有授权的 ID 返回
                let existing = self
                    .find_grant(role_id, grant.node)
                    .await?
                    .ok_or(err)?;
                Err(AppError::DuplicateGrant {
                    existing_id: existing.id.as_uuid(),
                })
            }
        }
    }

    async fn delete_grant(&self, id: GrantId) -> AppResult<Option<RoleModuleAccess>> {
        let row = sqlx::query_as::<_, GrantRow>(
            "DELETE FROM role_module_access WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        row.map(RoleModuleAccess::try_from).transpose()
    }

    async fn replace_grants(
        &self,
        role_id: RoleId,
        grants: &[GrantSpec],
    ) -> AppResult<Vec<RoleModuleAccess>> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM role_module_access WHERE role_id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;

        let mut rows = Vec::with_capacity(grants.len());
        for grant in grants {
            rows.push(insert_row(&mut tx, role_id, *grant, false).await?);
        }

        tx.commit().await?;

        into_grants(rows)
    }
}
