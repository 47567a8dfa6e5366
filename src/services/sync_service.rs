//! 模块同步服务
//!
//! 管理员通过 CLI 触发，把包声明的模块树同步到层级表。
//! 作用域判定、表结构预检与计量都在这里完成，计划的构建与应用由存储层在单个事务内执行。

use std::{path::PathBuf, time::Instant};

use crate::{
    config::TenancyConfig,
    error::{AppError, AppResult},
    models::{
        manifest::ModuleDefinition,
        module::SyncScope,
        sync::{SyncOptions, SyncReport},
    },
    repository::Store,
    services::{discovery, sync_plan::PlanOptions},
};

pub struct SyncService<S> {
    store: S,
    tenancy: TenancyConfig,
    manifest_dirs: Vec<PathBuf>,
}

impl<S: Store> SyncService<S> {
    pub fn new(store: S, tenancy: TenancyConfig, manifest_dirs: &[String]) -> Self {
        Self {
            store,
            tenancy,
            manifest_dirs: manifest_dirs.iter().map(PathBuf::from).collect(),
        }
    }

    /// 判定实际作用域
    ///
    /// 显式指定优先；否则租户上下文 → tenant，存在中心库标记表 → platform，都没有 → all。
    pub async fn effective_scope(&self, explicit: Option<SyncScope>) -> AppResult<SyncScope> {
        if let Some(scope) = explicit {
            return Ok(scope);
        }

        if self.tenancy.tenant_context_active() {
            return Ok(SyncScope::Tenant);
        }

        if self
            .store
            .table_exists(&self.tenancy.landlord_marker_table)
            .await?
        {
            return Ok(SyncScope::Platform);
        }

        Ok(SyncScope::All)
    }

    /// 发现清单并同步
    pub async fn sync(&self, options: &SyncOptions) -> AppResult<SyncReport> {
        let definitions = discovery::discover_modules(&self.manifest_dirs)?;
        self.sync_definitions(&definitions, options).await
    }

    /// 使用给定的模块定义同步
    pub async fn sync_definitions(
        &self,
        definitions: &[ModuleDefinition],
        options: &SyncOptions,
    ) -> AppResult<SyncReport> {
        discovery::validate_definitions(definitions)?;

        let scope = self.effective_scope(options.scope).await?;

        if options.force {
            tracing::warn!("Skipping hierarchy schema check (--force)");
        } else {
            let missing = self.store.missing_hierarchy_tables().await?;
            if !missing.is_empty() {
                return Err(AppError::sync_integrity(
                    "schema check",
                    format!(
                        "missing hierarchy tables: {}. Run the database migrations first",
                        missing.join(", ")
                    ),
                ));
            }
        }

        tracing::info!(
            scope = %scope,
            fresh = options.fresh,
            prune = options.prune,
            modules = definitions.len(),
            "Module sync started"
        );

        let start = Instant::now();
        let plan_options = PlanOptions {
            scope,
            fresh: options.fresh,
            prune: options.prune,
        };

        match self.store.synchronize(definitions, plan_options).await {
            Ok(report) => {
                metrics::counter!("module_sync_total", "status" => "success").increment(1);
                metrics::histogram!("module_sync_duration_seconds")
                    .record(start.elapsed().as_secs_f64());

                for (level, counts) in report.rows() {
                    tracing::info!(
                        hierarchy_level = level,
                        created = counts.created,
                        updated = counts.updated,
                        removed = counts.removed,
                        "Module sync level summary"
                    );
                }
                tracing::info!(
                    scope = %scope,
                    grants_removed = report.grants_removed,
                    unchanged = report.is_unchanged(),
                    elapsed_ms = start.elapsed().as_millis(),
                    "Module sync completed"
                );
                Ok(report)
            }
            Err(e) => {
                metrics::counter!("module_sync_total", "status" => "failure").increment(1);
                tracing::error!(scope = %scope, error = %e, "Module sync rolled back");
                Err(e)
            }
        }
    }
}
