//! Module hierarchy repository (模块层级数据访问)

use std::collections::HashMap;

use sqlx::{types::Json, PgConnection};
use uuid::Uuid;

use super::{ModuleRepository, PgStore};
use crate::{
    db,
    error::{AppError, AppResult},
    models::{
        ids::{ActionId, ComponentId, ModuleId, SubModuleId},
        manifest::ModuleDefinition,
        module::*,
        sync::{CascadeCounts, SyncReport},
    },
    services::sync_plan::{self, ModuleStep, NodeOp, PlanOptions},
};

/// `pg_advisory_xact_lock` key serializing sync runs
const SYNC_LOCK_KEY: i64 = 0x6d6f_6473_796e_63;

fn scope_filter(scope: SyncScope) -> Option<&'static str> {
    match scope {
        SyncScope::All => None,
        SyncScope::Platform => Some("platform"),
        SyncScope::Tenant => Some("tenant"),
    }
}

/// 按层级装配模块树
pub(crate) fn assemble_trees(
    modules: Vec<Module>,
    sub_modules: Vec<SubModule>,
    components: Vec<ModuleComponent>,
    actions: Vec<ModuleComponentAction>,
) -> Vec<ModuleTree> {
    let mut actions_by_component: HashMap<ComponentId, Vec<ModuleComponentAction>> = HashMap::new();
    for action in actions {
        actions_by_component
            .entry(action.module_component_id)
            .or_default()
            .push(action);
    }

    let mut components_by_sub: HashMap<SubModuleId, Vec<ComponentTree>> = HashMap::new();
    for component in components {
        let actions = actions_by_component.remove(&component.id).unwrap_or_default();
        components_by_sub
            .entry(component.sub_module_id)
            .or_default()
            .push(ComponentTree { component, actions });
    }

    let mut subs_by_module: HashMap<ModuleId, Vec<SubModuleTree>> = HashMap::new();
    for sub_module in sub_modules {
        let components = components_by_sub.remove(&sub_module.id).unwrap_or_default();
        subs_by_module
            .entry(sub_module.module_id)
            .or_default()
            .push(SubModuleTree {
                sub_module,
                components,
            });
    }

    modules
        .into_iter()
        .map(|module| {
            let sub_modules = subs_by_module.remove(&module.id).unwrap_or_default();
            ModuleTree {
                module,
                sub_modules,
            }
        })
        .collect()
}

/// 加载模块树；`include_deleted` 为 true 时包含软删除模块
async fn load_trees(
    conn: &mut PgConnection,
    scope: SyncScope,
    include_deleted: bool,
) -> Result<Vec<ModuleTree>, sqlx::Error> {
    let modules = sqlx::query_as::<_, Module>(
        r#"
        SELECT * FROM modules
        WHERE ($1::text IS NULL OR scope = $1)
          AND ($2 OR deleted_at IS NULL)
        ORDER BY priority, code
        "#,
    )
    .bind(scope_filter(scope))
    .bind(include_deleted)
    .fetch_all(&mut *conn)
    .await?;

    let module_ids: Vec<Uuid> = modules.iter().map(|m| m.id.as_uuid()).collect();

    let sub_modules = sqlx::query_as::<_, SubModule>(
        "SELECT * FROM sub_modules WHERE module_id = ANY($1) ORDER BY priority, code",
    )
    .bind(&module_ids)
    .fetch_all(&mut *conn)
    .await?;

    let components = sqlx::query_as::<_, ModuleComponent>(
        "SELECT * FROM module_components WHERE module_id = ANY($1) ORDER BY code",
    )
    .bind(&module_ids)
    .fetch_all(&mut *conn)
    .await?;

    let component_ids: Vec<Uuid> = components.iter().map(|c| c.id.as_uuid()).collect();

    let actions = sqlx::query_as::<_, ModuleComponentAction>(
        "SELECT * FROM module_component_actions WHERE module_component_id = ANY($1) ORDER BY code",
    )
    .bind(&component_ids)
    .fetch_all(&mut *conn)
    .await?;

    Ok(assemble_trees(modules, sub_modules, components, actions))
}

/// 按 动作 -> 组件 -> 子模块 -> 模块 的顺序删除
async fn delete_module_rows(
    conn: &mut PgConnection,
    id: ModuleId,
) -> Result<CascadeCounts, sqlx::Error> {
    let actions = sqlx::query(
        "DELETE FROM module_component_actions WHERE module_component_id IN (SELECT id FROM module_components WHERE module_id = $1)",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    let components = sqlx::query("DELETE FROM module_components WHERE module_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let sub_modules = sqlx::query("DELETE FROM sub_modules WHERE module_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    let modules = sqlx::query("DELETE FROM modules WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    Ok(CascadeCounts {
        modules,
        sub_modules,
        components,
        actions,
    })
}

/// 删除指向已不存在节点的授权（层级 ID 上没有外键，由应用维护）
async fn delete_orphaned_grants(conn: &mut PgConnection) -> Result<u64, sqlx::Error> {
    let removed = sqlx::query(
        r#"
        DELETE FROM role_module_access g
        WHERE (g.module_id IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM modules m WHERE m.id = g.module_id))
           OR (g.sub_module_id IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM sub_modules s WHERE s.id = g.sub_module_id))
           OR (g.component_id IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM module_components c WHERE c.id = g.component_id))
           OR (g.action_id IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM module_component_actions a WHERE a.id = g.action_id))
        "#,
    )
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(removed)
}

async fn delete_sub_module_rows(conn: &mut PgConnection, id: SubModuleId) -> Result<(), sqlx::Error> {
    sqlx::query(
        "DELETE FROM module_component_actions WHERE module_component_id IN (SELECT id FROM module_components WHERE sub_module_id = $1)",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;
    sqlx::query("DELETE FROM module_components WHERE sub_module_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM sub_modules WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn delete_component_rows(conn: &mut PgConnection, id: ComponentId) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM module_component_actions WHERE module_component_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM module_components WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// 应用单个模块的计划步骤（模块及其全部子节点）
async fn apply_module(conn: &mut PgConnection, step: &ModuleStep<'_>) -> Result<(), sqlx::Error> {
    let def = step.def;

    let module_id = match step.op {
        NodeOp::Create => {
            sqlx::query_scalar::<_, ModuleId>(
                r#"
                INSERT INTO modules (code, scope, name, description, icon, category, priority, is_active, is_core, version, dependencies)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING id
                "#,
            )
            .bind(&def.code)
            .bind(def.scope.as_str())
            .bind(&def.name)
            .bind(&def.description)
            .bind(&def.icon)
            .bind(&def.category)
            .bind(def.priority)
            .bind(def.is_active)
            .bind(def.is_core)
            .bind(&def.version)
            .bind(Json(&def.dependencies))
            .fetch_one(&mut *conn)
            .await?
        }
        NodeOp::Update(id) => {
            sqlx::query(
                r#"
                UPDATE modules
                SET scope = $2, name = $3, description = $4, icon = $5, category = $6, priority = $7,
                    is_active = $8, is_core = $9, version = $10, dependencies = $11,
                    deleted_at = NULL, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(def.scope.as_str())
            .bind(&def.name)
            .bind(&def.description)
            .bind(&def.icon)
            .bind(&def.category)
            .bind(def.priority)
            .bind(def.is_active)
            .bind(def.is_core)
            .bind(&def.version)
            .bind(Json(&def.dependencies))
            .execute(&mut *conn)
            .await?;
            id
        }
        NodeOp::Keep(id) => id,
    };

    for id in &step.stale_sub_modules {
        delete_sub_module_rows(conn, *id).await?;
    }

    for sm_step in &step.sub_modules {
        let sm = sm_step.def;
        let sub_module_id = match sm_step.op {
            NodeOp::Create => {
                sqlx::query_scalar::<_, SubModuleId>(
                    r#"
                    INSERT INTO sub_modules (module_id, code, name, description, icon, route, priority, is_active)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    RETURNING id
                    "#,
                )
                .bind(module_id)
                .bind(&sm.code)
                .bind(&sm.name)
                .bind(&sm.description)
                .bind(&sm.icon)
                .bind(&sm.route)
                .bind(sm.priority)
                .bind(sm.is_active)
                .fetch_one(&mut *conn)
                .await?
            }
            NodeOp::Update(id) => {
                sqlx::query(
                    r#"
                    UPDATE sub_modules
                    SET name = $2, description = $3, icon = $4, route = $5, priority = $6, is_active = $7, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(&sm.name)
                .bind(&sm.description)
                .bind(&sm.icon)
                .bind(&sm.route)
                .bind(sm.priority)
                .bind(sm.is_active)
                .execute(&mut *conn)
                .await?;
                id
            }
            NodeOp::Keep(id) => id,
        };

        for id in &sm_step.stale_components {
            delete_component_rows(conn, *id).await?;
        }

        for c_step in &sm_step.components {
            let c = c_step.def;
            let component_id = match c_step.op {
                NodeOp::Create => {
                    sqlx::query_scalar::<_, ComponentId>(
                        r#"
                        INSERT INTO module_components (module_id, sub_module_id, code, name, description, type, route, is_active)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                        RETURNING id
                        "#,
                    )
                    .bind(module_id)
                    .bind(sub_module_id)
                    .bind(&c.code)
                    .bind(&c.name)
                    .bind(&c.description)
                    .bind(c.component_type.as_str())
                    .bind(&c.route)
                    .bind(c.is_active)
                    .fetch_one(&mut *conn)
                    .await?
                }
                NodeOp::Update(id) => {
                    sqlx::query(
                        r#"
                        UPDATE module_components
                        SET name = $2, description = $3, type = $4, route = $5, is_active = $6, updated_at = NOW()
                        WHERE id = $1
                        "#,
                    )
                    .bind(id)
                    .bind(&c.name)
                    .bind(&c.description)
                    .bind(c.component_type.as_str())
                    .bind(&c.route)
                    .bind(c.is_active)
                    .execute(&mut *conn)
                    .await?;
                    id
                }
                NodeOp::Keep(id) => id,
            };

            for id in &c_step.stale_actions {
                sqlx::query("DELETE FROM module_component_actions WHERE id = $1")
                    .bind(*id)
                    .execute(&mut *conn)
                    .await?;
            }

            for a_step in &c_step.actions {
                let a = a_step.def;
                match a_step.op {
                    NodeOp::Create => {
                        sqlx::query(
                            r#"
                            INSERT INTO module_component_actions (module_component_id, code, name, description, is_active)
                            VALUES ($1, $2, $3, $4, $5)
                            "#,
                        )
                        .bind(component_id)
                        .bind(&a.code)
                        .bind(&a.name)
                        .bind(&a.description)
                        .bind(a.is_active)
                        .execute(&mut *conn)
                        .await?;
                    }
                    NodeOp::Update(id) => {
                        sqlx::query(
                            r#"
                            UPDATE module_component_actions
                            SET name = $2, description = $3, is_active = $4, updated_at = NOW()
                            WHERE id = $1
                            "#,
                        )
                        .bind(id)
                        .bind(&a.name)
                        .bind(&a.description)
                        .bind(a.is_active)
                        .execute(&mut *conn)
                        .await?;
                    }
                    NodeOp::Keep(_) => {}
                }
            }
        }
    }

    Ok(())
}

impl ModuleRepository for PgStore {
    async fn module_tree(&self, scope: SyncScope) -> AppResult<Vec<ModuleTree>> {
        let mut conn = self.db.acquire().await?;
        Ok(load_trees(&mut conn, scope, false).await?)
    }

    async fn find_module(&self, code: &str) -> AppResult<Option<Module>> {
        let module = sqlx::query_as::<_, Module>(
            "SELECT * FROM modules WHERE code = $1 AND deleted_at IS NULL",
        )
        .bind(code)
        .fetch_optional(&self.db)
        .await?;

        Ok(module)
    }

    async fn node_children(&self, node: HierarchyRef) -> AppResult<Vec<NodeSummary>> {
        let rows: Vec<NodeSummary> = match node {
            HierarchyRef::Module(id) => sqlx::query_as::<_, (Uuid, String, String, bool)>(
                "SELECT id, code, name, is_active FROM sub_modules WHERE module_id = $1 ORDER BY priority, code",
            )
            .bind(id)
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(|(id, code, name, is_active)| NodeSummary {
                node: HierarchyRef::SubModule(id.into()),
                code,
                name,
                is_active,
            })
            .collect(),
            HierarchyRef::SubModule(id) => sqlx::query_as::<_, (Uuid, String, String, bool)>(
                "SELECT id, code, name, is_active FROM module_components WHERE sub_module_id = $1 ORDER BY code",
            )
            .bind(id)
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(|(id, code, name, is_active)| NodeSummary {
                node: HierarchyRef::Component(id.into()),
                code,
                name,
                is_active,
            })
            .collect(),
            HierarchyRef::Component(id) => sqlx::query_as::<_, (Uuid, String, String, bool)>(
                "SELECT id, code, name, is_active FROM module_component_actions WHERE module_component_id = $1 ORDER BY code",
            )
            .bind(id)
            .fetch_all(&self.db)
            .await?
            .into_iter()
            .map(|(id, code, name, is_active)| NodeSummary {
                node: HierarchyRef::Action(id.into()),
                code,
                name,
                is_active,
            })
            .collect(),
            HierarchyRef::Action(_) => Vec::new(),
        };

        Ok(rows)
    }

    async fn resolve_action(&self, path: &ActionPath) -> AppResult<Option<ActionNode>> {
        let node = sqlx::query_as::<_, ActionNode>(
            r#"
            SELECT m.id AS module_id, sm.id AS sub_module_id, c.id AS component_id, a.id AS action_id
            FROM modules m
            JOIN sub_modules sm ON sm.module_id = m.id
            JOIN module_components c ON c.sub_module_id = sm.id
            JOIN module_component_actions a ON a.module_component_id = c.id
            WHERE m.code = $1 AND sm.code = $2 AND c.code = $3 AND a.code = $4
              AND m.deleted_at IS NULL
              AND m.is_active AND sm.is_active AND c.is_active AND a.is_active
            "#,
        )
        .bind(&path.module)
        .bind(&path.sub_module)
        .bind(&path.component)
        .bind(&path.action)
        .fetch_optional(&self.db)
        .await?;

        Ok(node)
    }

    async fn action_path(&self, action_id: ActionId) -> AppResult<Option<ActionPath>> {
        let path = sqlx::query_as::<_, ActionPath>(
            r#"
            SELECT m.code AS module, sm.code AS sub_module, c.code AS component, a.code AS action
            FROM module_component_actions a
            JOIN module_components c ON c.id = a.module_component_id
            JOIN sub_modules sm ON sm.id = c.sub_module_id
            JOIN modules m ON m.id = sm.module_id
            WHERE a.id = $1 AND m.deleted_at IS NULL
            "#,
        )
        .bind(action_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(path)
    }

    async fn node_exists(&self, node: HierarchyRef) -> AppResult<bool> {
        let sql = match node {
            HierarchyRef::Module(_) => {
                "SELECT EXISTS (SELECT 1 FROM modules WHERE id = $1 AND deleted_at IS NULL)"
            }
            HierarchyRef::SubModule(_) => {
                "SELECT EXISTS (SELECT 1 FROM sub_modules sm JOIN modules m ON m.id = sm.module_id WHERE sm.id = $1 AND m.deleted_at IS NULL)"
            }
            HierarchyRef::Component(_) => {
                "SELECT EXISTS (SELECT 1 FROM module_components c JOIN modules m ON m.id = c.module_id WHERE c.id = $1 AND m.deleted_at IS NULL)"
            }
            HierarchyRef::Action(_) => {
                r#"SELECT EXISTS (
                    SELECT 1 FROM module_component_actions a
                    JOIN module_components c ON c.id = a.module_component_id
                    JOIN modules m ON m.id = c.module_id
                    WHERE a.id = $1 AND m.deleted_at IS NULL
                )"#
            }
        };
        let id: Uuid = match node {
            HierarchyRef::Module(id) => id.into(),
            HierarchyRef::SubModule(id) => id.into(),
            HierarchyRef::Component(id) => id.into(),
            HierarchyRef::Action(id) => id.into(),
        };

        let exists = sqlx::query_scalar::<_, bool>(sql)
            .bind(id)
            .fetch_one(&self.db)
            .await?;

        Ok(exists)
    }

    async fn delete_module(&self, code: &str) -> AppResult<Option<CascadeCounts>> {
        let mut tx = self.db.begin().await?;

        let id = sqlx::query_scalar::<_, ModuleId>("SELECT id FROM modules WHERE code = $1 FOR UPDATE")
            .bind(code)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(id) = id else {
            return Ok(None);
        };

        let counts = delete_module_rows(&mut tx, id).await?;
        delete_orphaned_grants(&mut tx).await?;
        tx.commit().await?;

        Ok(Some(counts))
    }

    async fn missing_hierarchy_tables(&self) -> AppResult<Vec<String>> {
        let mut missing = Vec::new();
        for table in db::HIERARCHY_TABLES {
            if !db::table_exists(&self.db, table).await? {
                missing.push(table.to_string());
            }
        }
        Ok(missing)
    }

    async fn table_exists(&self, table: &str) -> AppResult<bool> {
        Ok(db::table_exists(&self.db, table).await?)
    }

    async fn synchronize(
        &self,
        definitions: &[ModuleDefinition],
        options: PlanOptions,
    ) -> AppResult<SyncReport> {
        let mut tx = self.db.begin().await?;

        // 同一时刻只允许一个同步运行；锁随事务结束释放
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(SYNC_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::sync_integrity("acquire sync lock", e.to_string()))?;

        let snapshot = load_trees(&mut tx, SyncScope::All, true)
            .await
            .map_err(|e| AppError::sync_integrity("load hierarchy", e.to_string()))?;

        let plan = sync_plan::build_plan(&snapshot, definitions, options);

        for id in &plan.module_deletes {
            delete_module_rows(&mut tx, *id)
                .await
                .map_err(|e| AppError::sync_integrity("delete module", e.to_string()))?;
        }

        for step in &plan.modules {
            apply_module(&mut tx, step).await.map_err(|e| {
                AppError::sync_integrity(&format!("module '{}'", step.def.code), e.to_string())
            })?;
        }

        let mut report = plan.report.clone();
        report.grants_removed = delete_orphaned_grants(&mut tx)
            .await
            .map_err(|e| AppError::sync_integrity("remove orphaned grants", e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::sync_integrity("commit", e.to_string()))?;

        Ok(report)
    }
}
