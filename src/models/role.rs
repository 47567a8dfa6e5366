//! Role and grant domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ids::{GrantId, RoleId};
use super::module::{DeploymentScope, HierarchyRef};
use super::ParseEnumError;

/// Holder type used for user accounts in `model_has_roles`
pub const USER_HOLDER_TYPE: &str = "user";

/// Role
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub guard_name: String,
    #[sqlx(try_from = "String")]
    pub scope: DeploymentScope,
    pub description: Option<String>,
    pub is_protected: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Polymorphic role holder, `(holder_type, holder_id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleHolder {
    pub holder_type: String,
    pub holder_id: Uuid,
}

impl RoleHolder {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            holder_type: USER_HOLDER_TYPE.to_string(),
            holder_id: user_id,
        }
    }
}

/// Which records a grant reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessScope {
    #[default]
    All,
    Own,
    Team,
    Department,
}

impl AccessScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessScope::All => "all",
            AccessScope::Own => "own",
            AccessScope::Team => "team",
            AccessScope::Department => "department",
        }
    }

    /// Ordering by reach: own < team < department < all
    pub fn breadth(&self) -> u8 {
        match self {
            AccessScope::Own => 0,
            AccessScope::Team => 1,
            AccessScope::Department => 2,
            AccessScope::All => 3,
        }
    }
}

impl std::fmt::Display for AccessScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for AccessScope {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "all" => Ok(AccessScope::All),
            "own" => Ok(AccessScope::Own),
            "team" => Ok(AccessScope::Team),
            "department" => Ok(AccessScope::Department),
            other => Err(ParseEnumError::new("access scope", other)),
        }
    }
}

/// A grant: one role, one hierarchy node, one access scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleModuleAccess {
    pub id: GrantId,
    pub role_id: RoleId,
    pub node: HierarchyRef,
    pub access_scope: AccessScope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Grant as requested by a caller, before persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSpec {
    pub node: HierarchyRef,
    #[serde(default)]
    pub access_scope: AccessScope,
}

/// How a write treats an existing grant for the same role and node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GrantWriteMode {
    /// Fail with the existing grant's id
    #[default]
    Reject,
    /// Overwrite the existing grant's access scope
    Upsert,
}

/// Grant request
#[derive(Debug, Deserialize)]
pub struct GrantAccessRequest {
    #[serde(flatten)]
    pub grant: GrantSpec,
    #[serde(default)]
    pub mode: GrantWriteMode,
}

/// Replace all grants of a role
#[derive(Debug, Deserialize)]
pub struct ReplaceAccessRequest {
    pub grants: Vec<GrantSpec>,
}

/// Create role request
#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default = "default_guard")]
    pub guard_name: String,
    #[serde(default)]
    pub scope: DeploymentScope,
    pub description: Option<String>,
}

fn default_guard() -> String {
    "web".to_string()
}

/// Update role request
#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Assign or revoke a role holder
#[derive(Debug, Deserialize)]
pub struct RoleHolderRequest {
    #[serde(default = "default_holder_type")]
    pub holder_type: String,
    pub holder_id: Uuid,
}

fn default_holder_type() -> String {
    USER_HOLDER_TYPE.to_string()
}

impl From<RoleHolderRequest> for RoleHolder {
    fn from(req: RoleHolderRequest) -> Self {
        RoleHolder {
            holder_type: req.holder_type,
            holder_id: req.holder_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ids::ComponentId;

    #[test]
    fn test_breadth_ordering() {
        assert!(AccessScope::All.breadth() > AccessScope::Department.breadth());
        assert!(AccessScope::Department.breadth() > AccessScope::Team.breadth());
        assert!(AccessScope::Team.breadth() > AccessScope::Own.breadth());
    }

    #[test]
    fn test_grant_request_parses_flattened_node() {
        let component = ComponentId::new();
        let body = serde_json::json!({
            "node": {"level": "component", "id": component},
            "access_scope": "own",
            "mode": "upsert"
        });
        let req: GrantAccessRequest = serde_json::from_value(body).unwrap();
        assert_eq!(req.grant.node, HierarchyRef::Component(component));
        assert_eq!(req.grant.access_scope, AccessScope::Own);
        assert_eq!(req.mode, GrantWriteMode::Upsert);
    }

    #[test]
    fn test_access_scope_rejects_unknown() {
        assert!(AccessScope::try_from("everyone".to_string()).is_err());
    }
}
