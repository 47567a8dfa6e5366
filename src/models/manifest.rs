//! Module manifest definitions
//!
//! The shape packages declare in their `module.json`. Only `code` and `name` are
//! required at every level; everything else has a default.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::module::{ComponentType, DeploymentScope};

/// Lowercase slug: `hrm`, `employee-directory`, `approve_leave`
static CODE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("valid code regex"));

fn default_category() -> String {
    "general".to_string()
}

fn default_priority() -> i32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    "1.0.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ModuleDefinition {
    #[validate(length(min = 1, max = 100), regex(path = *CODE_REGEX, message = "Module code must be a lowercase slug"))]
    pub code: String,
    #[validate(length(min = 1, max = 255, message = "Module name is required"))]
    pub name: String,
    #[serde(default)]
    pub scope: DeploymentScope,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_core: bool,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, alias = "sub_modules")]
    #[validate(nested)]
    pub submodules: Vec<SubModuleDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubModuleDefinition {
    #[validate(length(min = 1, max = 100), regex(path = *CODE_REGEX, message = "Sub-module code must be a lowercase slug"))]
    pub code: String,
    #[validate(length(min = 1, max = 255, message = "Sub-module name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    #[validate(nested)]
    pub components: Vec<ComponentDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ComponentDefinition {
    #[validate(length(min = 1, max = 100), regex(path = *CODE_REGEX, message = "Component code must be a lowercase slug"))]
    pub code: String,
    #[validate(length(min = 1, max = 255, message = "Component name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub component_type: ComponentType,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    #[validate(nested)]
    pub actions: Vec<ActionDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ActionDefinition {
    #[validate(length(min = 1, max = 100), regex(path = *CODE_REGEX, message = "Action code must be a lowercase slug"))]
    pub code: String,
    #[validate(length(min = 1, max = 255, message = "Action name is required"))]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

impl ModuleDefinition {
    /// Dotted paths of codes declared more than once under the same parent
    pub fn duplicate_codes(&self) -> Vec<String> {
        let mut duplicates = Vec::new();

        let mut seen = HashSet::new();
        for sm in &self.submodules {
            if !seen.insert(sm.code.as_str()) {
                duplicates.push(format!("{}.{}", self.code, sm.code));
            }

            let mut seen_components = HashSet::new();
            for c in &sm.components {
                if !seen_components.insert(c.code.as_str()) {
                    duplicates.push(format!("{}.{}.{}", self.code, sm.code, c.code));
                }

                let mut seen_actions = HashSet::new();
                for a in &c.actions {
                    if !seen_actions.insert(a.code.as_str()) {
                        duplicates.push(format!("{}.{}.{}.{}", self.code, sm.code, c.code, a.code));
                    }
                }
            }
        }

        duplicates
    }
}
