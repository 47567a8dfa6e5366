//! 模块同步计划
//!
//! 把持久化层级快照与发现的模块定义做差异比较，得到一份与存储无关的执行计划。
//! 计划只在事务内、持有同步锁时基于当前快照构建，执行方按顺序应用：
//! 先删除 `module_deletes`，再逐个模块自上而下 upsert。

use std::collections::{HashMap, HashSet};

use crate::models::{
    ids::{ActionId, ComponentId, ModuleId, SubModuleId},
    manifest::{ActionDefinition, ComponentDefinition, ModuleDefinition, SubModuleDefinition},
    module::{ComponentTree, ModuleTree, SubModuleTree, SyncScope},
    sync::{CascadeCounts, SyncReport},
};

/// 单个节点的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOp<Id> {
    Create,
    /// 已存在且至少一个字段变化
    Update(Id),
    /// 已存在且无变化
    Keep(Id),
}

impl<Id: Copy> NodeOp<Id> {
    pub fn existing(&self) -> Option<Id> {
        match self {
            NodeOp::Create => None,
            NodeOp::Update(id) | NodeOp::Keep(id) => Some(*id),
        }
    }
}

#[derive(Debug)]
pub struct ActionStep<'a> {
    pub op: NodeOp<ActionId>,
    pub def: &'a ActionDefinition,
}

#[derive(Debug)]
pub struct ComponentStep<'a> {
    pub op: NodeOp<ComponentId>,
    pub def: &'a ComponentDefinition,
    pub stale_actions: Vec<ActionId>,
    pub actions: Vec<ActionStep<'a>>,
}

#[derive(Debug)]
pub struct SubModuleStep<'a> {
    pub op: NodeOp<SubModuleId>,
    pub def: &'a SubModuleDefinition,
    pub stale_components: Vec<ComponentId>,
    pub components: Vec<ComponentStep<'a>>,
}

#[derive(Debug)]
pub struct ModuleStep<'a> {
    pub op: NodeOp<ModuleId>,
    pub def: &'a ModuleDefinition,
    pub stale_sub_modules: Vec<SubModuleId>,
    pub sub_modules: Vec<SubModuleStep<'a>>,
}

/// 同步执行计划，`report` 为应用后的预期计数
#[derive(Debug)]
pub struct SyncPlan<'a> {
    pub module_deletes: Vec<ModuleId>,
    pub modules: Vec<ModuleStep<'a>>,
    pub report: SyncReport,
}

/// 同步参数（作用域已确定）
#[derive(Debug, Clone, Copy)]
pub struct PlanOptions {
    pub scope: SyncScope,
    pub fresh: bool,
    pub prune: bool,
}

/// 构建同步计划
///
/// `snapshot` 必须包含全部已持久化模块（含软删除的），因为模块代码全局唯一。
pub fn build_plan<'a>(
    snapshot: &[ModuleTree],
    definitions: &'a [ModuleDefinition],
    options: PlanOptions,
) -> SyncPlan<'a> {
    let declared: HashSet<&str> = definitions.iter().map(|d| d.code.as_str()).collect();
    let mut report = SyncReport::new(options.scope);
    let mut module_deletes = Vec::new();
    let mut surviving: HashMap<&str, &ModuleTree> = HashMap::new();

    for tree in snapshot {
        let module = &tree.module;
        let removable = !module.is_core && options.scope.includes(module.scope);
        // fresh 清空作用域内全部非核心模块；孤立模块清理始终执行
        if removable && (options.fresh || !declared.contains(module.code.as_str())) {
            module_deletes.push(module.id);
            report.add_removed(module_cascade(tree));
        } else {
            surviving.insert(module.code.as_str(), tree);
        }
    }

    let modules = definitions
        .iter()
        .filter(|def| options.scope.includes(def.scope))
        .map(|def| {
            plan_module(
                def,
                surviving.get(def.code.as_str()).copied(),
                options.prune,
                &mut report,
            )
        })
        .collect();

    SyncPlan {
        module_deletes,
        modules,
        report,
    }
}

fn plan_module<'a>(
    def: &'a ModuleDefinition,
    existing: Option<&ModuleTree>,
    prune: bool,
    report: &mut SyncReport,
) -> ModuleStep<'a> {
    let op = match existing {
        None => {
            report.modules.created += 1;
            NodeOp::Create
        }
        Some(tree) if module_changed(tree, def) => {
            report.modules.updated += 1;
            NodeOp::Update(tree.module.id)
        }
        Some(tree) => NodeOp::Keep(tree.module.id),
    };

    let children: HashMap<&str, &SubModuleTree> = existing
        .map(|tree| {
            tree.sub_modules
                .iter()
                .map(|sm| (sm.sub_module.code.as_str(), sm))
                .collect()
        })
        .unwrap_or_default();

    let mut stale_sub_modules = Vec::new();
    if prune {
        let declared: HashSet<&str> = def.submodules.iter().map(|s| s.code.as_str()).collect();
        for (code, sm) in &children {
            if !declared.contains(code) {
                stale_sub_modules.push(sm.sub_module.id);
                report.add_removed(sub_module_cascade(sm));
            }
        }
    }

    let sub_modules = def
        .submodules
        .iter()
        .map(|sm_def| plan_sub_module(sm_def, children.get(sm_def.code.as_str()).copied(), prune, report))
        .collect();

    ModuleStep {
        op,
        def,
        stale_sub_modules,
        sub_modules,
    }
}

fn plan_sub_module<'a>(
    def: &'a SubModuleDefinition,
    existing: Option<&SubModuleTree>,
    prune: bool,
    report: &mut SyncReport,
) -> SubModuleStep<'a> {
    let op = match existing {
        None => {
            report.sub_modules.created += 1;
            NodeOp::Create
        }
        Some(tree) if sub_module_changed(tree, def) => {
            report.sub_modules.updated += 1;
            NodeOp::Update(tree.sub_module.id)
        }
        Some(tree) => NodeOp::Keep(tree.sub_module.id),
    };

    let children: HashMap<&str, &ComponentTree> = existing
        .map(|tree| {
            tree.components
                .iter()
                .map(|c| (c.component.code.as_str(), c))
                .collect()
        })
        .unwrap_or_default();

    let mut stale_components = Vec::new();
    if prune {
        let declared: HashSet<&str> = def.components.iter().map(|c| c.code.as_str()).collect();
        for (code, c) in &children {
            if !declared.contains(code) {
                stale_components.push(c.component.id);
                report.components.removed += 1;
                report.actions.removed += c.actions.len() as u64;
            }
        }
    }

    let components = def
        .components
        .iter()
        .map(|c_def| plan_component(c_def, children.get(c_def.code.as_str()).copied(), prune, report))
        .collect();

    SubModuleStep {
        op,
        def,
        stale_components,
        components,
    }
}

fn plan_component<'a>(
    def: &'a ComponentDefinition,
    existing: Option<&ComponentTree>,
    prune: bool,
    report: &mut SyncReport,
) -> ComponentStep<'a> {
    let op = match existing {
        None => {
            report.components.created += 1;
            NodeOp::Create
        }
        Some(tree) if component_changed(tree, def) => {
            report.components.updated += 1;
            NodeOp::Update(tree.component.id)
        }
        Some(tree) => NodeOp::Keep(tree.component.id),
    };

    let mut stale_actions = Vec::new();
    let mut actions = Vec::with_capacity(def.actions.len());

    if let Some(tree) = existing {
        if prune {
            let declared: HashSet<&str> = def.actions.iter().map(|a| a.code.as_str()).collect();
            for action in tree.actions.iter().filter(|a| !declared.contains(a.code.as_str())) {
                stale_actions.push(action.id);
                report.actions.removed += 1;
            }
        }
    }

    for a_def in &def.actions {
        let current = existing.and_then(|tree| tree.actions.iter().find(|a| a.code == a_def.code));
        let op = match current {
            None => {
                report.actions.created += 1;
                NodeOp::Create
            }
            Some(action)
                if action.name != a_def.name
                    || action.description != a_def.description
                    || action.is_active != a_def.is_active =>
            {
                report.actions.updated += 1;
                NodeOp::Update(action.id)
            }
            Some(action) => NodeOp::Keep(action.id),
        };
        actions.push(ActionStep { op, def: a_def });
    }

    ComponentStep {
        op,
        def,
        stale_actions,
        actions,
    }
}

fn module_changed(tree: &ModuleTree, def: &ModuleDefinition) -> bool {
    let m = &tree.module;
    m.deleted_at.is_some()
        || m.scope != def.scope
        || m.name != def.name
        || m.description != def.description
        || m.icon != def.icon
        || m.category != def.category
        || m.priority != def.priority
        || m.is_active != def.is_active
        || m.is_core != def.is_core
        || m.version != def.version
        || m.dependencies != def.dependencies
}

fn sub_module_changed(tree: &SubModuleTree, def: &SubModuleDefinition) -> bool {
    let sm = &tree.sub_module;
    sm.name != def.name
        || sm.description != def.description
        || sm.icon != def.icon
        || sm.route != def.route
        || sm.priority != def.priority
        || sm.is_active != def.is_active
}

fn component_changed(tree: &ComponentTree, def: &ComponentDefinition) -> bool {
    let c = &tree.component;
    c.name != def.name
        || c.description != def.description
        || c.component_type != def.component_type
        || c.route != def.route
        || c.is_active != def.is_active
}

/// 删除一个模块会级联移除的行数
pub fn module_cascade(tree: &ModuleTree) -> CascadeCounts {
    let mut counts = CascadeCounts {
        modules: 1,
        ..Default::default()
    };
    for sm in &tree.sub_modules {
        let sub = sub_module_cascade(sm);
        counts.sub_modules += sub.sub_modules;
        counts.components += sub.components;
        counts.actions += sub.actions;
    }
    counts
}

fn sub_module_cascade(tree: &SubModuleTree) -> CascadeCounts {
    CascadeCounts {
        modules: 0,
        sub_modules: 1,
        components: tree.components.len() as u64,
        actions: tree.components.iter().map(|c| c.actions.len() as u64).sum(),
    }
}
