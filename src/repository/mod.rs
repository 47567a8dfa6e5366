//! Repository layer
//!
//! One trait per table family. `PgStore` is the production implementation,
//! `MemoryStore` keeps the same semantics in process.

pub mod access_repo;
pub mod audit_repo;
pub mod device_repo;
pub mod memory;
pub mod module_repo;
pub mod role_repo;
pub mod user_repo;

pub use memory::MemoryStore;

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        audit::{AuthEventFilters, AuthenticationEvent, NewAuthEvent},
        device::{DeviceInfo, DeviceSummary, UserDevice},
        ids::{ActionId, GrantId, RoleId},
        manifest::ModuleDefinition,
        module::{ActionNode, ActionPath, HierarchyRef, Module, ModuleTree, NodeSummary, SyncScope},
        role::{CreateRoleRequest, GrantSpec, GrantWriteMode, Role, RoleHolder, RoleModuleAccess, UpdateRoleRequest},
        sync::{CascadeCounts, SyncReport},
        user::{NewUser, User},
    },
    services::{
        device_policy::{DeviceDecision, DevicePolicy},
        sync_plan::PlanOptions,
    },
};

/// Module hierarchy store
#[trait_variant::make(ModuleRepository: Send)]
pub trait LocalModuleRepository {
    /// Non-deleted modules in scope with their full subtree, ordered by priority then code
    async fn module_tree(&self, scope: SyncScope) -> AppResult<Vec<ModuleTree>>;

    /// Find a non-deleted module by code
    async fn find_module(&self, code: &str) -> AppResult<Option<Module>>;

    /// Direct children of a node; empty for actions and unknown nodes
    async fn node_children(&self, node: HierarchyRef) -> AppResult<Vec<NodeSummary>>;

    /// Resolve a code path to an active action leaf
    async fn resolve_action(&self, path: &ActionPath) -> AppResult<Option<ActionNode>>;

    /// Code path of an action
    async fn action_path(&self, action_id: ActionId) -> AppResult<Option<ActionPath>>;

    /// Whether a node exists in a non-deleted module
    async fn node_exists(&self, node: HierarchyRef) -> AppResult<bool>;

    /// Delete a module and everything under it
    async fn delete_module(&self, code: &str) -> AppResult<Option<CascadeCounts>>;

    /// Hierarchy tables missing from the schema
    async fn missing_hierarchy_tables(&self) -> AppResult<Vec<String>>;

    async fn table_exists(&self, table: &str) -> AppResult<bool>;

    /// Reconcile the stored hierarchy with `definitions`, all or nothing
    async fn synchronize(
        &self,
        definitions: &[ModuleDefinition],
        options: PlanOptions,
    ) -> AppResult<SyncReport>;
}

/// Roles and the polymorphic holder pivot
#[trait_variant::make(RoleRepository: Send)]
pub trait LocalRoleRepository {
    async fn list_roles(&self) -> AppResult<Vec<Role>>;

    async fn find_role(&self, id: RoleId) -> AppResult<Option<Role>>;

    async fn find_role_by_name(&self, name: &str) -> AppResult<Option<Role>>;

    async fn create_role(&self, req: &CreateRoleRequest) -> AppResult<Role>;

    /// Create the named role as protected, or mark an existing one protected
    async fn ensure_protected_role(&self, name: &str) -> AppResult<Role>;

    async fn update_role(&self, id: RoleId, req: &UpdateRoleRequest) -> AppResult<Option<Role>>;

    /// Delete a role together with its grants and holder rows
    async fn delete_role(&self, id: RoleId) -> AppResult<bool>;

    async fn assign_role(&self, role_id: RoleId, holder: &RoleHolder) -> AppResult<()>;

    async fn revoke_role(&self, role_id: RoleId, holder: &RoleHolder) -> AppResult<bool>;

    async fn roles_of_holder(&self, holder: &RoleHolder) -> AppResult<Vec<Role>>;

    async fn holders_of_role(&self, role_id: RoleId) -> AppResult<Vec<RoleHolder>>;
}

/// Role-module-access grants
#[trait_variant::make(AccessRepository: Send)]
pub trait LocalAccessRepository {
    async fn grants_for_roles(&self, role_ids: &[RoleId]) -> AppResult<Vec<RoleModuleAccess>>;

    async fn find_grant_by_id(&self, id: GrantId) -> AppResult<Option<RoleModuleAccess>>;

    async fn find_grant(
        &self,
        role_id: RoleId,
        node: HierarchyRef,
    ) -> AppResult<Option<RoleModuleAccess>>;

    /// Insert a grant; an existing grant for the same role and node is rejected or overwritten per `mode`
    async fn insert_grant(
        &self,
        role_id: RoleId,
        grant: GrantSpec,
        mode: GrantWriteMode,
    ) -> AppResult<RoleModuleAccess>;

    async fn delete_grant(&self, id: GrantId) -> AppResult<Option<RoleModuleAccess>>;

    /// Replace every grant of a role in one transaction
    async fn replace_grants(
        &self,
        role_id: RoleId,
        grants: &[GrantSpec],
    ) -> AppResult<Vec<RoleModuleAccess>>;
}

#[trait_variant::make(UserRepository: Send)]
pub trait LocalUserRepository {
    async fn find_user(&self, id: Uuid) -> AppResult<Option<User>>;

    /// Case-insensitive email lookup
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>>;

    async fn create_user(&self, user: NewUser) -> AppResult<User>;

    /// Update `last_login_at`, `last_login_ip` and `login_count`
    async fn record_login(&self, id: Uuid, ip: Option<&str>) -> AppResult<()>;

    /// Lock with a reason, or unlock with `None`
    async fn set_account_lock(&self, id: Uuid, reason: Option<&str>) -> AppResult<Option<User>>;
}

/// Input of one device binding attempt
#[derive(Debug, Clone)]
pub struct DeviceBindRequest {
    pub device_id: String,
    pub info: DeviceInfo,
    pub policy: DevicePolicy,
    /// Replace the stored token hash even for a known device
    pub rotate_token: bool,
    /// Hash of a freshly generated device token
    pub token_hash: String,
    /// Session identifier issued by this login
    pub session_id: Uuid,
}

/// Outcome of a device binding attempt
#[derive(Debug, Clone)]
pub enum DeviceBinding {
    Bound {
        device: UserDevice,
        decision: DeviceDecision,
        /// The request's token hash was stored
        token_issued: bool,
    },
    Blocked(DeviceSummary),
}

#[trait_variant::make(DeviceRepository: Send)]
pub trait LocalDeviceRepository {
    /// Decide and apply a device binding while holding the user's row lock
    async fn bind_device(&self, user_id: Uuid, req: &DeviceBindRequest) -> AppResult<DeviceBinding>;

    async fn devices_of_user(&self, user_id: Uuid) -> AppResult<Vec<UserDevice>>;

    async fn find_device(&self, user_id: Uuid, device_id: &str) -> AppResult<Option<UserDevice>>;

    /// Deactivate one device and drop its session
    async fn deactivate_device(&self, user_id: Uuid, device_id: &str) -> AppResult<Option<UserDevice>>;

    async fn set_device_trust(
        &self,
        user_id: Uuid,
        device_id: &str,
        trusted: bool,
    ) -> AppResult<Option<UserDevice>>;
}

/// Append-only authentication events
#[trait_variant::make(AuditRepository: Send)]
pub trait LocalAuditRepository {
    async fn record_event(&self, event: NewAuthEvent) -> AppResult<AuthenticationEvent>;

    /// Newest first
    async fn query_events(&self, filters: &AuthEventFilters) -> AppResult<Vec<AuthenticationEvent>>;
}

/// Everything the services need from storage
pub trait Store:
    ModuleRepository
    + RoleRepository
    + AccessRepository
    + UserRepository
    + DeviceRepository
    + AuditRepository
    + Clone
    + Send
    + Sync
    + 'static
{
}

impl<T> Store for T where
    T: ModuleRepository
        + RoleRepository
        + AccessRepository
        + UserRepository
        + DeviceRepository
        + AuditRepository
        + Clone
        + Send
        + Sync
        + 'static
{
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pub(crate) db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &PgPool {
        &self.db
    }
}
