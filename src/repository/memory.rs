//! In-memory store (内存存储)
//!
//! Same semantics as `PgStore`, including the uniqueness rules and the all-or-nothing
//! sync. Used by integration tests and database-less demo runs. Every operation takes
//! the single state lock, so multi-step writes are serialized like the row and
//! advisory locks serialize them in PostgreSQL.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::Utc;
use uuid::Uuid;

use super::{
    module_repo::assemble_trees, AccessRepository, AuditRepository, DeviceBindRequest,
    DeviceBinding, DeviceRepository, ModuleRepository, RoleRepository, UserRepository,
};
use crate::{
    db::HIERARCHY_TABLES,
    error::{AppError, AppResult},
    models::{
        audit::{AuthEventFilters, AuthenticationEvent, NewAuthEvent},
        device::UserDevice,
        ids::*,
        manifest::ModuleDefinition,
        module::*,
        role::*,
        sync::{CascadeCounts, SyncReport},
        user::{NewUser, User},
    },
    services::{
        device_policy::{self, DeviceDecision},
        sync_plan::{self, NodeOp, PlanOptions},
    },
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    modules: Vec<Module>,
    sub_modules: Vec<SubModule>,
    components: Vec<ModuleComponent>,
    actions: Vec<ModuleComponentAction>,
    roles: Vec<Role>,
    holders: Vec<(RoleId, RoleHolder)>,
    grants: Vec<RoleModuleAccess>,
    users: Vec<User>,
    devices: Vec<UserDevice>,
    events: Vec<AuthenticationEvent>,
    /// Tables present besides the hierarchy tables (e.g. a landlord marker)
    extra_tables: HashSet<String>,
    /// Hierarchy tables simulated as missing
    dropped_tables: HashSet<String>,
    /// Module code whose sync step fails, for exercising rollback
    failing_module: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark a non-hierarchy table as present
    pub fn create_table(&self, table: &str) {
        let mut state = self.state();
        state.dropped_tables.remove(table);
        state.extra_tables.insert(table.to_string());
    }

    /// Simulate a missing table
    pub fn drop_table(&self, table: &str) {
        let mut state = self.state();
        state.extra_tables.remove(table);
        state.dropped_tables.insert(table.to_string());
    }

    /// Make the next sync fail while applying the given module
    pub fn fail_sync_at(&self, module_code: Option<&str>) {
        self.state().failing_module = module_code.map(str::to_string);
    }

    /// Soft-delete a module
    pub fn soft_delete_module(&self, code: &str) -> bool {
        let mut state = self.state();
        match state.modules.iter_mut().find(|m| m.code == code) {
            Some(module) => {
                module.deleted_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Row counts of the four hierarchy tables
    pub fn hierarchy_row_counts(&self) -> CascadeCounts {
        let state = self.state();
        CascadeCounts {
            modules: state.modules.len() as u64,
            sub_modules: state.sub_modules.len() as u64,
            components: state.components.len() as u64,
            actions: state.actions.len() as u64,
        }
    }
}

impl MemoryState {
    fn module_alive(&self, id: ModuleId) -> bool {
        self.modules
            .iter()
            .any(|m| m.id == id && m.deleted_at.is_none())
    }

    fn trees(&self, scope: SyncScope, include_deleted: bool) -> Vec<ModuleTree> {
        let mut modules: Vec<Module> = self
            .modules
            .iter()
            .filter(|m| scope.includes(m.scope) && (include_deleted || m.deleted_at.is_none()))
            .cloned()
            .collect();
        modules.sort_by(|a, b| (a.priority, &a.code).cmp(&(b.priority, &b.code)));

        let mut sub_modules = self.sub_modules.clone();
        sub_modules.sort_by(|a, b| (a.priority, &a.code).cmp(&(b.priority, &b.code)));
        let mut components = self.components.clone();
        components.sort_by(|a, b| a.code.cmp(&b.code));
        let mut actions = self.actions.clone();
        actions.sort_by(|a, b| a.code.cmp(&b.code));

        assemble_trees(modules, sub_modules, components, actions)
    }

    fn delete_module_rows(&mut self, id: ModuleId) -> CascadeCounts {
        let component_ids: HashSet<ComponentId> = self
            .components
            .iter()
            .filter(|c| c.module_id == id)
            .map(|c| c.id)
            .collect();

        let before = (
            self.actions.len(),
            self.components.len(),
            self.sub_modules.len(),
            self.modules.len(),
        );
        self.actions
            .retain(|a| !component_ids.contains(&a.module_component_id));
        self.components.retain(|c| c.module_id != id);
        self.sub_modules.retain(|s| s.module_id != id);
        self.modules.retain(|m| m.id != id);

        CascadeCounts {
            actions: (before.0 - self.actions.len()) as u64,
            components: (before.1 - self.components.len()) as u64,
            sub_modules: (before.2 - self.sub_modules.len()) as u64,
            modules: (before.3 - self.modules.len()) as u64,
        }
    }

    /// 删除指向已不存在节点的授权；软删除的模块仍保留其授权
    fn purge_orphaned_grants(&mut self) -> u64 {
        let before = self.grants.len();
        let grants = std::mem::take(&mut self.grants);
        self.grants = grants
            .into_iter()
            .filter(|g| self.node_row_exists(g.node))
            .collect();
        (before - self.grants.len()) as u64
    }

    fn node_row_exists(&self, node: HierarchyRef) -> bool {
        match node {
            HierarchyRef::Module(id) => self.modules.iter().any(|m| m.id == id),
            HierarchyRef::SubModule(id) => self.sub_modules.iter().any(|s| s.id == id),
            HierarchyRef::Component(id) => self.components.iter().any(|c| c.id == id),
            HierarchyRef::Action(id) => self.actions.iter().any(|a| a.id == id),
        }
    }

    fn delete_sub_module_rows(&mut self, id: SubModuleId) {
        let component_ids: HashSet<ComponentId> = self
            .components
            .iter()
            .filter(|c| c.sub_module_id == id)
            .map(|c| c.id)
            .collect();
        self.actions
            .retain(|a| !component_ids.contains(&a.module_component_id));
        self.components.retain(|c| c.sub_module_id != id);
        self.sub_modules.retain(|s| s.id != id);
    }

    fn delete_component_rows(&mut self, id: ComponentId) {
        self.actions.retain(|a| a.module_component_id != id);
        self.components.retain(|c| c.id != id);
    }

    fn apply_plan(&mut self, plan: &sync_plan::SyncPlan<'_>) -> AppResult<()> {
        let now = Utc::now();

        for id in &plan.module_deletes {
            self.delete_module_rows(*id);
        }

        for step in &plan.modules {
            let def = step.def;
            if self.failing_module.as_deref() == Some(def.code.as_str()) {
                return Err(AppError::sync_integrity(
                    &format!("module '{}'", def.code),
                    "injected failure",
                ));
            }

            let module_id = match step.op {
                NodeOp::Create => {
                    let id = ModuleId::new();
                    self.modules.push(Module {
                        id,
                        code: def.code.clone(),
                        scope: def.scope,
                        name: def.name.clone(),
                        description: def.description.clone(),
                        icon: def.icon.clone(),
                        category: def.category.clone(),
                        priority: def.priority,
                        is_active: def.is_active,
                        is_core: def.is_core,
                        version: def.version.clone(),
                        dependencies: def.dependencies.clone(),
                        created_at: now,
                        updated_at: now,
                        deleted_at: None,
                    });
                    id
                }
                NodeOp::Update(id) => {
                    if let Some(m) = self.modules.iter_mut().find(|m| m.id == id) {
                        m.scope = def.scope;
                        m.name = def.name.clone();
                        m.description = def.description.clone();
                        m.icon = def.icon.clone();
                        m.category = def.category.clone();
                        m.priority = def.priority;
                        m.is_active = def.is_active;
                        m.is_core = def.is_core;
                        m.version = def.version.clone();
                        m.dependencies = def.dependencies.clone();
                        m.deleted_at = None;
                        m.updated_at = now;
                    }
                    id
                }
                NodeOp::Keep(id) => id,
            };

            for id in &step.stale_sub_modules {
                self.delete_sub_module_rows(*id);
            }

            for sm_step in &step.sub_modules {
                let sm = sm_step.def;
                let sub_module_id = match sm_step.op {
                    NodeOp::Create => {
                        let id = SubModuleId::new();
                        self.sub_modules.push(SubModule {
                            id,
                            module_id,
                            code: sm.code.clone(),
                            name: sm.name.clone(),
                            description: sm.description.clone(),
                            icon: sm.icon.clone(),
                            route: sm.route.clone(),
                            priority: sm.priority,
                            is_active: sm.is_active,
                            created_at: now,
                            updated_at: now,
                        });
                        id
                    }
                    NodeOp::Update(id) => {
                        if let Some(row) = self.sub_modules.iter_mut().find(|s| s.id == id) {
                            row.name = sm.name.clone();
                            row.description = sm.description.clone();
                            row.icon = sm.icon.clone();
                            row.route = sm.route.clone();
                            row.priority = sm.priority;
                            row.is_active = sm.is_active;
                            row.updated_at = now;
                        }
                        id
                    }
                    NodeOp::Keep(id) => id,
                };

                for id in &sm_step.stale_components {
                    self.delete_component_rows(*id);
                }

                for c_step in &sm_step.components {
                    let c = c_step.def;
                    let component_id = match c_step.op {
                        NodeOp::Create => {
                            let id = ComponentId::new();
                            self.components.push(ModuleComponent {
                                id,
                                module_id,
                                sub_module_id,
                                code: c.code.clone(),
                                name: c.name.clone(),
                                description: c.description.clone(),
                                component_type: c.component_type,
                                route: c.route.clone(),
                                is_active: c.is_active,
                                created_at: now,
                                updated_at: now,
                            });
                            id
                        }
                        NodeOp::Update(id) => {
                            if let Some(row) = self.components.iter_mut().find(|x| x.id == id) {
                                row.name = c.name.clone();
                                row.description = c.description.clone();
                                row.component_type = c.component_type;
                                row.route = c.route.clone();
                                row.is_active = c.is_active;
                                row.updated_at = now;
                            }
                            id
                        }
                        NodeOp::Keep(id) => id,
                    };

                    let stale: HashSet<ActionId> = c_step.stale_actions.iter().copied().collect();
                    self.actions.retain(|a| !stale.contains(&a.id));

                    for a_step in &c_step.actions {
                        let a = a_step.def;
                        match a_step.op {
                            NodeOp::Create => self.actions.push(ModuleComponentAction {
                                id: ActionId::new(),
                                module_component_id: component_id,
                                code: a.code.clone(),
                                name: a.name.clone(),
                                description: a.description.clone(),
                                is_active: a.is_active,
                                created_at: now,
                                updated_at: now,
                            }),
                            NodeOp::Update(id) => {
                                if let Some(row) = self.actions.iter_mut().find(|x| x.id == id) {
                                    row.name = a.name.clone();
                                    row.description = a.description.clone();
                                    row.is_active = a.is_active;
                                    row.updated_at = now;
                                }
                            }
                            NodeOp::Keep(_) => {}
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn find_grant(&self, role_id: RoleId, node: HierarchyRef) -> Option<&RoleModuleAccess> {
        self.grants
            .iter()
            .find(|g| g.role_id == role_id && g.node == node)
    }

    fn insert_grant(
        &mut self,
        role_id: RoleId,
        grant: GrantSpec,
        mode: GrantWriteMode,
    ) -> AppResult<RoleModuleAccess> {
        let now = Utc::now();

        if let Some(pos) = self
            .grants
            .iter()
            .position(|g| g.role_id == role_id && g.node == grant.node)
        {
            return match mode {
                GrantWriteMode::Reject => Err(AppError::DuplicateGrant {
                    existing_id: self.grants[pos].id.as_uuid(),
                }),
                GrantWriteMode::Upsert => {
                    let existing = &mut self.grants[pos];
                    existing.access_scope = grant.access_scope;
                    existing.updated_at = now;
                    Ok(existing.clone())
                }
            };
        }

        let stored = RoleModuleAccess {
            id: GrantId::new(),
            role_id,
            node: grant.node,
            access_scope: grant.access_scope,
            created_at: now,
            updated_at: now,
        };
        self.grants.push(stored.clone());
        Ok(stored)
    }
}

impl ModuleRepository for MemoryStore {
    async fn module_tree(&self, scope: SyncScope) -> AppResult<Vec<ModuleTree>> {
        Ok(self.state().trees(scope, false))
    }

    async fn find_module(&self, code: &str) -> AppResult<Option<Module>> {
        Ok(self
            .state()
            .modules
            .iter()
            .find(|m| m.code == code && m.deleted_at.is_none())
            .cloned())
    }

    async fn node_children(&self, node: HierarchyRef) -> AppResult<Vec<NodeSummary>> {
        let state = self.state();
        let mut children: Vec<NodeSummary> = match node {
            HierarchyRef::Module(id) => state
                .sub_modules
                .iter()
                .filter(|s| s.module_id == id)
                .map(|s| NodeSummary {
                    node: HierarchyRef::SubModule(s.id),
                    code: s.code.clone(),
                    name: s.name.clone(),
                    is_active: s.is_active,
                })
                .collect(),
            HierarchyRef::SubModule(id) => state
                .components
                .iter()
                .filter(|c| c.sub_module_id == id)
                .map(|c| NodeSummary {
                    node: HierarchyRef::Component(c.id),
                    code: c.code.clone(),
                    name: c.name.clone(),
                    is_active: c.is_active,
                })
                .collect(),
            HierarchyRef::Component(id) => state
                .actions
                .iter()
                .filter(|a| a.module_component_id == id)
                .map(|a| NodeSummary {
                    node: HierarchyRef::Action(a.id),
                    code: a.code.clone(),
                    name: a.name.clone(),
                    is_active: a.is_active,
                })
                .collect(),
            HierarchyRef::Action(_) => Vec::new(),
        };
        children.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(children)
    }

    async fn resolve_action(&self, path: &ActionPath) -> AppResult<Option<ActionNode>> {
        let state = self.state();

        let node = state
            .modules
            .iter()
            .find(|m| m.code == path.module && m.deleted_at.is_none() && m.is_active)
            .and_then(|m| {
                state
                    .sub_modules
                    .iter()
                    .find(|s| s.module_id == m.id && s.code == path.sub_module && s.is_active)
            })
            .and_then(|s| {
                state
                    .components
                    .iter()
                    .find(|c| c.sub_module_id == s.id && c.code == path.component && c.is_active)
            })
            .and_then(|c| {
                state
                    .actions
                    .iter()
                    .find(|a| a.module_component_id == c.id && a.code == path.action && a.is_active)
                    .map(|a| ActionNode {
                        module_id: c.module_id,
                        sub_module_id: c.sub_module_id,
                        component_id: c.id,
                        action_id: a.id,
                    })
            });

        Ok(node)
    }

    async fn action_path(&self, action_id: ActionId) -> AppResult<Option<ActionPath>> {
        let state = self.state();

        let path = state
            .actions
            .iter()
            .find(|a| a.id == action_id)
            .and_then(|a| {
                let c = state.components.iter().find(|c| c.id == a.module_component_id)?;
                let s = state.sub_modules.iter().find(|s| s.id == c.sub_module_id)?;
                let m = state
                    .modules
                    .iter()
                    .find(|m| m.id == s.module_id && m.deleted_at.is_none())?;
                Some(ActionPath::new(&m.code, &s.code, &c.code, &a.code))
            });

        Ok(path)
    }

    async fn node_exists(&self, node: HierarchyRef) -> AppResult<bool> {
        let state = self.state();

        let module_id = match node {
            HierarchyRef::Module(id) => Some(id),
            HierarchyRef::SubModule(id) => state
                .sub_modules
                .iter()
                .find(|s| s.id == id)
                .map(|s| s.module_id),
            HierarchyRef::Component(id) => state
                .components
                .iter()
                .find(|c| c.id == id)
                .map(|c| c.module_id),
            HierarchyRef::Action(id) => state
                .actions
                .iter()
                .find(|a| a.id == id)
                .and_then(|a| state.components.iter().find(|c| c.id == a.module_component_id))
                .map(|c| c.module_id),
        };

        Ok(module_id.is_some_and(|id| state.module_alive(id)))
    }

    async fn delete_module(&self, code: &str) -> AppResult<Option<CascadeCounts>> {
        let mut state = self.state();
        let Some(id) = state.modules.iter().find(|m| m.code == code).map(|m| m.id) else {
            return Ok(None);
        };
        let counts = state.delete_module_rows(id);
        state.purge_orphaned_grants();
        Ok(Some(counts))
    }

    async fn missing_hierarchy_tables(&self) -> AppResult<Vec<String>> {
        let state = self.state();
        Ok(HIERARCHY_TABLES
            .iter()
            .filter(|t| state.dropped_tables.contains(**t))
            .map(|t| t.to_string())
            .collect())
    }

    async fn table_exists(&self, table: &str) -> AppResult<bool> {
        let state = self.state();
        if state.dropped_tables.contains(table) {
            return Ok(false);
        }
        Ok(HIERARCHY_TABLES.contains(&table) || state.extra_tables.contains(table))
    }

    async fn synchronize(
        &self,
        definitions: &[ModuleDefinition],
        options: PlanOptions,
    ) -> AppResult<SyncReport> {
        let mut state = self.state();

        if let Some(table) = HIERARCHY_TABLES
            .iter()
            .find(|t| state.dropped_tables.contains(**t))
        {
            return Err(AppError::sync_integrity(
                "load hierarchy",
                format!("relation \"{}\" does not exist", table),
            ));
        }

        // 在副本上应用，成功后整体替换，失败时原状态不变
        let mut working = state.clone();
        let snapshot = working.trees(SyncScope::All, true);
        let plan = sync_plan::build_plan(&snapshot, definitions, options);
        working.apply_plan(&plan)?;
        working.failing_module = None;

        let mut report = plan.report.clone();
        report.grants_removed = working.purge_orphaned_grants();

        *state = working;
        Ok(report)
    }
}

impl RoleRepository for MemoryStore {
    async fn list_roles(&self) -> AppResult<Vec<Role>> {
        let mut roles = self.state().roles.clone();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn find_role(&self, id: RoleId) -> AppResult<Option<Role>> {
        Ok(self.state().roles.iter().find(|r| r.id == id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> AppResult<Option<Role>> {
        Ok(self.state().roles.iter().find(|r| r.name == name).cloned())
    }

    async fn create_role(&self, req: &CreateRoleRequest) -> AppResult<Role> {
        let mut state = self.state();
        if state
            .roles
            .iter()
            .any(|r| r.name == req.name && r.guard_name == req.guard_name)
        {
            return Err(AppError::validation("A role with this name already exists"));
        }

        let now = Utc::now();
        let role = Role {
            id: RoleId::new(),
            name: req.name.clone(),
            guard_name: req.guard_name.clone(),
            scope: req.scope,
            description: req.description.clone(),
            is_protected: false,
            created_at: now,
            updated_at: now,
        };
        state.roles.push(role.clone());
        Ok(role)
    }

    async fn ensure_protected_role(&self, name: &str) -> AppResult<Role> {
        let mut state = self.state();
        let now = Utc::now();
        if let Some(role) = state
            .roles
            .iter_mut()
            .find(|r| r.name == name && r.guard_name == "web")
        {
            role.is_protected = true;
            role.updated_at = now;
            return Ok(role.clone());
        }

        let role = Role {
            id: RoleId::new(),
            name: name.to_string(),
            guard_name: "web".to_string(),
            scope: DeploymentScope::Platform,
            description: Some("Unrestricted access to every module".to_string()),
            is_protected: true,
            created_at: now,
            updated_at: now,
        };
        state.roles.push(role.clone());
        Ok(role)
    }

    async fn update_role(&self, id: RoleId, req: &UpdateRoleRequest) -> AppResult<Option<Role>> {
        let mut state = self.state();
        Ok(state.roles.iter_mut().find(|r| r.id == id).map(|role| {
            if let Some(name) = &req.name {
                role.name = name.clone();
            }
            if let Some(description) = &req.description {
                role.description = Some(description.clone());
            }
            role.updated_at = Utc::now();
            role.clone()
        }))
    }

    async fn delete_role(&self, id: RoleId) -> AppResult<bool> {
        let mut state = self.state();
        let before = state.roles.len();
        state.roles.retain(|r| r.id != id);
        state.holders.retain(|(role_id, _)| *role_id != id);
        state.grants.retain(|g| g.role_id != id);
        Ok(state.roles.len() < before)
    }

    async fn assign_role(&self, role_id: RoleId, holder: &RoleHolder) -> AppResult<()> {
        let mut state = self.state();
        if !state.roles.iter().any(|r| r.id == role_id) {
            return Err(AppError::not_found("role"));
        }
        if !state
            .holders
            .iter()
            .any(|(r, h)| *r == role_id && h == holder)
        {
            state.holders.push((role_id, holder.clone()));
        }
        Ok(())
    }

    async fn revoke_role(&self, role_id: RoleId, holder: &RoleHolder) -> AppResult<bool> {
        let mut state = self.state();
        let before = state.holders.len();
        state
            .holders
            .retain(|(r, h)| !(*r == role_id && h == holder));
        Ok(state.holders.len() < before)
    }

    async fn roles_of_holder(&self, holder: &RoleHolder) -> AppResult<Vec<Role>> {
        let state = self.state();
        let mut roles: Vec<Role> = state
            .holders
            .iter()
            .filter(|(_, h)| h == holder)
            .filter_map(|(role_id, _)| state.roles.iter().find(|r| r.id == *role_id).cloned())
            .collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn holders_of_role(&self, role_id: RoleId) -> AppResult<Vec<RoleHolder>> {
        Ok(self
            .state()
            .holders
            .iter()
            .filter(|(r, _)| *r == role_id)
            .map(|(_, h)| h.clone())
            .collect())
    }
}

impl AccessRepository for MemoryStore {
    async fn grants_for_roles(&self, role_ids: &[RoleId]) -> AppResult<Vec<RoleModuleAccess>> {
        Ok(self
            .state()
            .grants
            .iter()
            .filter(|g| role_ids.contains(&g.role_id))
            .cloned()
            .collect())
    }

    async fn find_grant(
        &self,
        role_id: RoleId,
        node: HierarchyRef,
    ) -> AppResult<Option<RoleModuleAccess>> {
        Ok(self.state().find_grant(role_id, node).cloned())
    }

    async fn insert_grant(
        &self,
        role_id: RoleId,
        grant: GrantSpec,
        mode: GrantWriteMode,
    ) -> AppResult<RoleModuleAccess> {
        self.state().insert_grant(role_id, grant, mode)
    }

    async fn find_grant_by_id(&self, id: GrantId) -> AppResult<Option<RoleModuleAccess>> {
        Ok(self.state().grants.iter().find(|g| g.id == id).cloned())
    }

    async fn delete_grant(&self, id: GrantId) -> AppResult<Option<RoleModuleAccess>> {
        let mut state = self.state();
        let removed = state
            .grants
            .iter()
            .position(|g| g.id == id)
            .map(|pos| state.grants.remove(pos));
        Ok(removed)
    }

    async fn replace_grants(
        &self,
        role_id: RoleId,
        grants: &[GrantSpec],
    ) -> AppResult<Vec<RoleModuleAccess>> {
        let mut state = self.state();
        let mut working = state.clone();
        working.grants.retain(|g| g.role_id != role_id);

        let mut stored = Vec::with_capacity(grants.len());
        for grant in grants {
            stored.push(working.insert_grant(role_id, *grant, GrantWriteMode::Reject)?);
        }

        state.grants = working.grants;
        Ok(stored)
    }
}

impl UserRepository for MemoryStore {
    async fn find_user(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.state().users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let email = email.trim();
        Ok(self
            .state()
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut state = self.state();
        let email = user.email.trim().to_string();
        if state.users.iter().any(|u| u.email.eq_ignore_ascii_case(&email)) {
            return Err(AppError::validation("Email already registered"));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: user.name,
            email,
            password_hash: user.password_hash,
            department_id: user.department_id,
            is_super_admin: user.is_super_admin,
            allow_multiple_devices: user.allow_multiple_devices,
            oauth_provider: None,
            oauth_provider_id: None,
            account_locked_at: None,
            locked_reason: None,
            last_login_at: None,
            last_login_ip: None,
            login_count: 0,
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn record_login(&self, id: Uuid, ip: Option<&str>) -> AppResult<()> {
        let mut state = self.state();
        if let Some(user) = state.users.iter_mut().find(|u| u.id == id) {
            let now = Utc::now();
            user.last_login_at = Some(now);
            user.last_login_ip = ip.map(str::to_string);
            user.login_count += 1;
            user.updated_at = now;
        }
        Ok(())
    }

    async fn set_account_lock(&self, id: Uuid, reason: Option<&str>) -> AppResult<Option<User>> {
        let mut state = self.state();
        Ok(state.users.iter_mut().find(|u| u.id == id).map(|user| {
            let now = Utc::now();
            user.account_locked_at = reason.map(|_| now);
            user.locked_reason = reason.map(str::to_string);
            user.updated_at = now;
            user.clone()
        }))
    }
}

impl DeviceRepository for MemoryStore {
    async fn bind_device(&self, user_id: Uuid, req: &DeviceBindRequest) -> AppResult<DeviceBinding> {
        let mut state = self.state();
        if !state.users.iter().any(|u| u.id == user_id) {
            return Err(AppError::not_found("user"));
        }

        let devices: Vec<UserDevice> = state
            .devices
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        let decision = device_policy::decide(&devices, &req.device_id, req.policy);
        let info = &req.info;
        let now = Utc::now();

        let refresh = |device: &mut UserDevice| {
            if info.device_name.is_some() {
                device.device_name = info.device_name.clone();
            }
            if info.browser.is_some() {
                device.browser = info.browser.clone();
            }
            if info.platform.is_some() {
                device.platform = info.platform.clone();
            }
            device.ip_address = info.ip_address.clone();
            device.user_agent = info.user_agent.clone();
            device.current_session_id = Some(req.session_id);
            device.last_used_at = now;
            device.updated_at = now;
        };

        let (device, token_issued) = match &decision {
            DeviceDecision::Blocked { conflicting } => {
                return Ok(DeviceBinding::Blocked(conflicting.clone()));
            }
            DeviceDecision::Register { trust } => {
                let device = UserDevice {
                    id: Uuid::new_v4(),
                    user_id,
                    device_id: req.device_id.clone(),
                    device_name: info.device_name.clone(),
                    browser: info.browser.clone(),
                    platform: info.platform.clone(),
                    ip_address: info.ip_address.clone(),
                    user_agent: info.user_agent.clone(),
                    device_token_hash: req.token_hash.clone(),
                    current_session_id: Some(req.session_id),
                    is_active: true,
                    is_trusted: *trust,
                    last_used_at: now,
                    created_at: now,
                    updated_at: now,
                };
                state.devices.push(device.clone());
                (device, true)
            }
            DeviceDecision::Reuse { id } => {
                let device = state
                    .devices
                    .iter_mut()
                    .find(|d| d.id == *id)
                    .ok_or_else(|| AppError::internal_error("device row vanished"))?;
                refresh(&mut *device);
                if req.rotate_token {
                    device.device_token_hash = req.token_hash.clone();
                }
                (device.clone(), req.rotate_token)
            }
            DeviceDecision::Reactivate { id, trust } => {
                let device = state
                    .devices
                    .iter_mut()
                    .find(|d| d.id == *id)
                    .ok_or_else(|| AppError::internal_error("device row vanished"))?;
                refresh(&mut *device);
                device.device_token_hash = req.token_hash.clone();
                device.is_active = true;
                device.is_trusted = *trust;
                (device.clone(), true)
            }
        };

        Ok(DeviceBinding::Bound {
            device,
            decision,
            token_issued,
        })
    }

    async fn devices_of_user(&self, user_id: Uuid) -> AppResult<Vec<UserDevice>> {
        let mut devices: Vec<UserDevice> = self
            .state()
            .devices
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        devices.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        Ok(devices)
    }

    async fn find_device(&self, user_id: Uuid, device_id: &str) -> AppResult<Option<UserDevice>> {
        Ok(self
            .state()
            .devices
            .iter()
            .find(|d| d.user_id == user_id && d.device_id == device_id)
            .cloned())
    }

    async fn deactivate_device(&self, user_id: Uuid, device_id: &str) -> AppResult<Option<UserDevice>> {
        let mut state = self.state();
        Ok(state
            .devices
            .iter_mut()
            .find(|d| d.user_id == user_id && d.device_id == device_id)
            .map(|device| {
                device.is_active = false;
                device.current_session_id = None;
                device.updated_at = Utc::now();
                device.clone()
            }))
    }

    async fn set_device_trust(
        &self,
        user_id: Uuid,
        device_id: &str,
        trusted: bool,
    ) -> AppResult<Option<UserDevice>> {
        let mut state = self.state();
        Ok(state
            .devices
            .iter_mut()
            .find(|d| d.user_id == user_id && d.device_id == device_id)
            .map(|device| {
                device.is_trusted = trusted;
                device.updated_at = Utc::now();
                device.clone()
            }))
    }
}

impl AuditRepository for MemoryStore {
    async fn record_event(&self, event: NewAuthEvent) -> AppResult<AuthenticationEvent> {
        let event = event.into_event();
        self.state().events.push(event.clone());
        Ok(event)
    }

    async fn query_events(&self, filters: &AuthEventFilters) -> AppResult<Vec<AuthenticationEvent>> {
        let state = self.state();
        // 按插入顺序倒序，同一时刻写入的事件也保持先后
        Ok(state
            .events
            .iter()
            .rev()
            .filter(|e| filters.matches(e))
            .take(filters.effective_limit() as usize)
            .cloned()
            .collect())
    }
}
