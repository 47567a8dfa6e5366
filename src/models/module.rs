//! Module hierarchy domain models
//!
//! Module -> SubModule -> ModuleComponent -> ModuleComponentAction. Codes are
//! unique only within their parent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ActionId, ComponentId, ModuleId, SubModuleId};
use super::ParseEnumError;

/// Deployment context a module or role belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentScope {
    Platform,
    #[default]
    Tenant,
}

impl DeploymentScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentScope::Platform => "platform",
            DeploymentScope::Tenant => "tenant",
        }
    }
}

impl std::fmt::Display for DeploymentScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for DeploymentScope {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for DeploymentScope {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "platform" => Ok(DeploymentScope::Platform),
            "tenant" => Ok(DeploymentScope::Tenant),
            other => Err(ParseEnumError::new("deployment scope", other)),
        }
    }
}

/// Scope a sync run operates on. `All` is used by standalone deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncScope {
    Platform,
    Tenant,
    All,
}

impl SyncScope {
    pub fn includes(&self, scope: DeploymentScope) -> bool {
        match self {
            SyncScope::All => true,
            SyncScope::Platform => scope == DeploymentScope::Platform,
            SyncScope::Tenant => scope == DeploymentScope::Tenant,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncScope::Platform => "platform",
            SyncScope::Tenant => "tenant",
            SyncScope::All => "all",
        }
    }
}

impl std::fmt::Display for SyncScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SyncScope {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "platform" => Ok(SyncScope::Platform),
            "tenant" => Ok(SyncScope::Tenant),
            "all" => Ok(SyncScope::All),
            other => Err(ParseEnumError::new("sync scope", other)),
        }
    }
}

/// Kind of UI element a component represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    #[default]
    Page,
    Widget,
    Form,
    Modal,
    Feature,
}

impl ComponentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Page => "page",
            ComponentType::Widget => "widget",
            ComponentType::Form => "form",
            ComponentType::Modal => "modal",
            ComponentType::Feature => "feature",
        }
    }
}

impl TryFrom<String> for ComponentType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "page" => Ok(ComponentType::Page),
            "widget" => Ok(ComponentType::Widget),
            "form" => Ok(ComponentType::Form),
            "modal" => Ok(ComponentType::Modal),
            "feature" => Ok(ComponentType::Feature),
            other => Err(ParseEnumError::new("component type", other)),
        }
    }
}

/// Top-level feature grouping
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Module {
    pub id: ModuleId,
    pub code: String,
    #[sqlx(try_from = "String")]
    pub scope: DeploymentScope,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub category: String,
    pub priority: i32,
    pub is_active: bool,
    pub is_core: bool,
    pub version: String,
    #[sqlx(json)]
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubModule {
    pub id: SubModuleId,
    pub module_id: ModuleId,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub route: Option<String>,
    pub priority: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModuleComponent {
    pub id: ComponentId,
    pub module_id: ModuleId,
    pub sub_module_id: SubModuleId,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    #[sqlx(rename = "type", try_from = "String")]
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub route: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ModuleComponentAction {
    pub id: ActionId,
    pub module_component_id: ComponentId,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Depth of a hierarchy node, root first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyLevel {
    Module,
    SubModule,
    Component,
    Action,
}

/// Reference to exactly one hierarchy node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", content = "id", rename_all = "snake_case")]
pub enum HierarchyRef {
    Module(ModuleId),
    SubModule(SubModuleId),
    Component(ComponentId),
    Action(ActionId),
}

impl HierarchyRef {
    pub fn level(&self) -> HierarchyLevel {
        match self {
            HierarchyRef::Module(_) => HierarchyLevel::Module,
            HierarchyRef::SubModule(_) => HierarchyLevel::SubModule,
            HierarchyRef::Component(_) => HierarchyLevel::Component,
            HierarchyRef::Action(_) => HierarchyLevel::Action,
        }
    }

    /// Build from the four nullable columns of a grant row. Exactly one must be set.
    pub fn from_columns(
        module_id: Option<ModuleId>,
        sub_module_id: Option<SubModuleId>,
        component_id: Option<ComponentId>,
        action_id: Option<ActionId>,
    ) -> Option<Self> {
        match (module_id, sub_module_id, component_id, action_id) {
            (Some(id), None, None, None) => Some(HierarchyRef::Module(id)),
            (None, Some(id), None, None) => Some(HierarchyRef::SubModule(id)),
            (None, None, Some(id), None) => Some(HierarchyRef::Component(id)),
            (None, None, None, Some(id)) => Some(HierarchyRef::Action(id)),
            _ => None,
        }
    }

    /// The four nullable columns, in table order
    pub fn to_columns(
        &self,
    ) -> (
        Option<ModuleId>,
        Option<SubModuleId>,
        Option<ComponentId>,
        Option<ActionId>,
    ) {
        match *self {
            HierarchyRef::Module(id) => (Some(id), None, None, None),
            HierarchyRef::SubModule(id) => (None, Some(id), None, None),
            HierarchyRef::Component(id) => (None, None, Some(id), None),
            HierarchyRef::Action(id) => (None, None, None, Some(id)),
        }
    }
}

/// A fully resolved action leaf with the ids of all its ancestors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, sqlx::FromRow)]
pub struct ActionNode {
    pub module_id: ModuleId,
    pub sub_module_id: SubModuleId,
    pub component_id: ComponentId,
    pub action_id: ActionId,
}

impl ActionNode {
    /// Self and ancestors, deepest first. Grant resolution walks this order.
    pub fn lineage(&self) -> [HierarchyRef; 4] {
        [
            HierarchyRef::Action(self.action_id),
            HierarchyRef::Component(self.component_id),
            HierarchyRef::SubModule(self.sub_module_id),
            HierarchyRef::Module(self.module_id),
        ]
    }
}

/// Code path of an action, e.g. `hrm.employees.employee-directory.view`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActionPath {
    pub module: String,
    pub sub_module: String,
    pub component: String,
    pub action: String,
}

impl ActionPath {
    pub fn new(module: &str, sub_module: &str, component: &str, action: &str) -> Self {
        Self {
            module: module.to_string(),
            sub_module: sub_module.to_string(),
            component: component.to_string(),
            action: action.to_string(),
        }
    }
}

impl std::fmt::Display for ActionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.module, self.sub_module, self.component, self.action
        )
    }
}

impl std::str::FromStr for ActionPath {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('.').collect();
        match parts.as_slice() {
            [m, sm, c, a] if parts.iter().all(|p| !p.is_empty()) => Ok(ActionPath::new(m, sm, c, a)),
            _ => Err(ParseEnumError::new("action path", s)),
        }
    }
}

/// Child listing entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSummary {
    pub node: HierarchyRef,
    pub code: String,
    pub name: String,
    pub is_active: bool,
}

// ==================== Tree views ====================

#[derive(Debug, Clone, Serialize)]
pub struct ComponentTree {
    #[serde(flatten)]
    pub component: ModuleComponent,
    pub actions: Vec<ModuleComponentAction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubModuleTree {
    #[serde(flatten)]
    pub sub_module: SubModule,
    pub components: Vec<ComponentTree>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleTree {
    #[serde(flatten)]
    pub module: Module,
    pub sub_modules: Vec<SubModuleTree>,
}

impl ModuleTree {
    /// Every action leaf under this module
    pub fn action_nodes(&self) -> impl Iterator<Item = ActionNode> + '_ {
        self.sub_modules.iter().flat_map(move |sm| {
            sm.components.iter().flat_map(move |c| {
                c.actions.iter().map(move |a| ActionNode {
                    module_id: self.module.id,
                    sub_module_id: sm.sub_module.id,
                    component_id: c.component.id,
                    action_id: a.id,
                })
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hierarchy_ref_columns_round_trip_each_level() {
        let component = ComponentId::new();
        let r = HierarchyRef::Component(component);
        let (m, sm, c, a) = r.to_columns();
        assert_eq!((m, sm, c, a), (None, None, Some(component), None));
        assert_eq!(HierarchyRef::from_columns(m, sm, c, a), Some(r));
    }

    #[test]
    fn test_hierarchy_ref_rejects_ambiguous_columns() {
        assert_eq!(HierarchyRef::from_columns(None, None, None, None), None);
        assert_eq!(
            HierarchyRef::from_columns(Some(ModuleId::new()), None, Some(ComponentId::new()), None),
            None
        );
    }

    #[test]
    fn test_lineage_is_deepest_first() {
        let node = ActionNode {
            module_id: ModuleId::new(),
            sub_module_id: SubModuleId::new(),
            component_id: ComponentId::new(),
            action_id: ActionId::new(),
        };
        let levels: Vec<HierarchyLevel> = node.lineage().iter().map(|r| r.level()).collect();
        assert_eq!(
            levels,
            vec![
                HierarchyLevel::Action,
                HierarchyLevel::Component,
                HierarchyLevel::SubModule,
                HierarchyLevel::Module
            ]
        );
    }

    #[test]
    fn test_action_path_parse() {
        let path: ActionPath = "hrm.employees.employee-directory.view".parse().unwrap();
        assert_eq!(path.component, "employee-directory");
        assert_eq!(path.to_string(), "hrm.employees.employee-directory.view");
        assert!("hrm.employees.view".parse::<ActionPath>().is_err());
        assert!("hrm..x.view".parse::<ActionPath>().is_err());
    }

    #[test]
    fn test_sync_scope_includes() {
        assert!(SyncScope::All.includes(DeploymentScope::Platform));
        assert!(SyncScope::Tenant.includes(DeploymentScope::Tenant));
        assert!(!SyncScope::Tenant.includes(DeploymentScope::Platform));
        assert_eq!("PLATFORM".parse::<SyncScope>().unwrap(), SyncScope::Platform);
    }
}
