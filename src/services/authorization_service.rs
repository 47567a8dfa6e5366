//! 授权决策引擎
//!
//! 检查顺序固定：
//! 1. 超级管理员直接放行（受保护的超级管理员角色，或用户上的平台级标记）
//! 2. 按编码路径解析动作节点，解析不到即拒绝
//! 3. 沿 动作 → 组件 → 子模块 → 模块 查找授权，第一个命中的（最深的）决定结果，
//!    不论它来自哪个角色
//!
//! 拒绝是正常结果（`false` / [`Decision`]），引擎本身不记录日志，只有基础设施错误才返回 `Err`。
//! 同一请求内的多次检查共用一个 [`Authorizer`]，角色与授权只查询一次。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        device::UserDevice,
        module::{
            ActionNode, ActionPath, ComponentTree, HierarchyLevel, HierarchyRef, ModuleTree,
            SubModuleTree, SyncScope,
        },
        role::{AccessScope, Role, RoleHolder, RoleModuleAccess},
        user::User,
    },
    repository::Store,
};

/// 授权范围判断所需的记录归属信息
pub trait ScopedRecord {
    /// 记录所有者（通常是创建者的用户 ID）
    fn owner_id(&self) -> Option<Uuid>;

    fn team_id(&self) -> Option<Uuid> {
        None
    }

    fn department_id(&self) -> Option<Uuid> {
        None
    }
}

/// 显式给出的记录归属，供 HTTP 检查接口与调用方直接构造
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RecordScope {
    pub owner_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
}

impl ScopedRecord for RecordScope {
    fn owner_id(&self) -> Option<Uuid> {
        self.owner_id
    }

    fn team_id(&self) -> Option<Uuid> {
        self.team_id
    }

    fn department_id(&self) -> Option<Uuid> {
        self.department_id
    }
}

impl ScopedRecord for UserDevice {
    fn owner_id(&self) -> Option<Uuid> {
        Some(self.user_id)
    }
}

/// 用户账户归属于其本人与所在部门
impl ScopedRecord for User {
    fn owner_id(&self) -> Option<Uuid> {
        Some(self.id)
    }

    fn department_id(&self) -> Option<Uuid> {
        self.department_id
    }
}

/// 当前用户所属的团队与部门
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    pub team_ids: Vec<Uuid>,
    pub department_id: Option<Uuid>,
}

/// 团队 / 部门成员关系解析（由业务模块提供）
#[trait_variant::make(MembershipResolver: Send)]
pub trait LocalMembershipResolver {
    async fn membership(&self, user: &User) -> AppResult<Membership>;
}

/// 默认解析：只使用用户自身的 `department_id`，不属于任何团队
#[derive(Debug, Clone, Copy, Default)]
pub struct UserDepartmentMembership;

impl MembershipResolver for UserDepartmentMembership {
    async fn membership(&self, user: &User) -> AppResult<Membership> {
        Ok(Membership {
            team_ids: Vec::new(),
            department_id: user.department_id,
        })
    }
}

/// 一次检查的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Decision {
    /// 超级管理员放行
    SuperAdmin,
    /// 命中授权
    Granted {
        level: HierarchyLevel,
        node: HierarchyRef,
        access_scope: AccessScope,
    },
    /// 编码路径不对应任何启用的动作
    UnknownAction,
    /// 任何层级都没有授权
    NoGrant,
}

impl Decision {
    /// 不考虑记录范围时是否放行
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::SuperAdmin | Decision::Granted { .. })
    }
}

/// 一组角色的有效授权，按节点索引
///
/// 同一节点被多个角色授权时取范围最宽的那一条。
#[derive(Debug, Clone, Default)]
pub struct GrantSet {
    grants: HashMap<HierarchyRef, AccessScope>,
}

impl GrantSet {
    pub fn from_grants<I>(grants: I) -> Self
    where
        I: IntoIterator<Item = RoleModuleAccess>,
    {
        let mut set = HashMap::new();
        for grant in grants {
            set.entry(grant.node)
                .and_modify(|scope: &mut AccessScope| {
                    if grant.access_scope.breadth() > scope.breadth() {
                        *scope = grant.access_scope;
                    }
                })
                .or_insert(grant.access_scope);
        }
        Self { grants: set }
    }

    /// 最深的命中授权
    pub fn resolve(&self, node: &ActionNode) -> Option<(HierarchyRef, AccessScope)> {
        node.lineage()
            .into_iter()
            .find_map(|r| self.grants.get(&r).map(|scope| (r, *scope)))
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }
}

/// 授权决策引擎
#[derive(Clone)]
pub struct AuthorizationService<S, M = UserDepartmentMembership> {
    store: S,
    super_admin_role: String,
    membership: M,
}

impl<S: Store> AuthorizationService<S> {
    pub fn new(store: S, super_admin_role: impl Into<String>) -> Self {
        Self::with_membership(store, super_admin_role, UserDepartmentMembership)
    }
}

impl<S, M> AuthorizationService<S, M>
where
    S: Store,
    M: MembershipResolver + Sync,
{
    pub fn with_membership(store: S, super_admin_role: impl Into<String>, membership: M) -> Self {
        Self {
            store,
            super_admin_role: super_admin_role.into(),
            membership,
        }
    }

    pub fn super_admin_role(&self) -> &str {
        &self.super_admin_role
    }

    /// 为一个请求中的一个用户创建检查器
    pub fn authorizer<'a>(&'a self, user: &'a User) -> Authorizer<'a, S, M> {
        Authorizer {
            service: self,
            user,
            roles: OnceCell::new(),
            grants: OnceCell::new(),
            membership: OnceCell::new(),
        }
    }

    /// `can(user, module, sub_module, component, action)`
    pub async fn can(&self, user: &User, path: &ActionPath) -> AppResult<bool> {
        self.authorizer(user).can(path).await
    }

    /// 带记录范围的检查
    pub async fn can_with_scope<R>(&self, user: &User, path: &ActionPath, record: &R) -> AppResult<bool>
    where
        R: ScopedRecord + Sync,
    {
        self.authorizer(user).can_with_scope(path, record).await
    }
}

/// 单个请求内的授权检查器，缓存角色、授权与成员关系
pub struct Authorizer<'a, S, M = UserDepartmentMembership> {
    service: &'a AuthorizationService<S, M>,
    user: &'a User,
    roles: OnceCell<Vec<Role>>,
    grants: OnceCell<GrantSet>,
    membership: OnceCell<Membership>,
}

impl<'a, S, M> Authorizer<'a, S, M>
where
    S: Store,
    M: MembershipResolver + Sync,
{
    pub fn user(&self) -> &User {
        self.user
    }

    async fn roles(&self) -> AppResult<&Vec<Role>> {
        self.roles
            .get_or_try_init(|| async {
                self.service
                    .store
                    .roles_of_holder(&RoleHolder::user(self.user.id))
                    .await
            })
            .await
    }

    /// 超级管理员判断，只在这里实现
    pub async fn is_super_admin(&self) -> AppResult<bool> {
        if self.user.is_super_admin {
            return Ok(true);
        }
        let roles = self.roles().await?;
        Ok(roles
            .iter()
            .any(|r| r.is_protected && r.name == self.service.super_admin_role))
    }

    /// 当前用户所有角色的有效授权
    pub async fn grants(&self) -> AppResult<&GrantSet> {
        self.grants
            .get_or_try_init(|| async {
                let role_ids: Vec<_> = self.roles().await?.iter().map(|r| r.id).collect();
                let grants = self.service.store.grants_for_roles(&role_ids).await?;
                Ok::<_, AppError>(GrantSet::from_grants(grants))
            })
            .await
    }

    async fn membership(&self) -> AppResult<&Membership> {
        self.membership
            .get_or_try_init(|| MembershipResolver::membership(&self.service.membership, self.user))
            .await
    }

    /// 完整的检查结论
    pub async fn decide(&self, path: &ActionPath) -> AppResult<Decision> {
        if self.is_super_admin().await? {
            return Ok(Decision::SuperAdmin);
        }

        let Some(node) = self.service.store.resolve_action(path).await? else {
            return Ok(Decision::UnknownAction);
        };

        let decision = match self.grants().await?.resolve(&node) {
            Some((node, access_scope)) => Decision::Granted {
                level: node.level(),
                node,
                access_scope,
            },
            None => Decision::NoGrant,
        };
        Ok(decision)
    }

    pub async fn can(&self, path: &ActionPath) -> AppResult<bool> {
        Ok(self.decide(path).await?.is_allowed())
    }

    /// 命中授权后再按其范围判断记录
    pub async fn can_with_scope<R>(&self, path: &ActionPath, record: &R) -> AppResult<bool>
    where
        R: ScopedRecord + Sync,
    {
        match self.decide(path).await? {
            Decision::SuperAdmin => Ok(true),
            Decision::Granted { access_scope, .. } => self.scope_permits(access_scope, record).await,
            Decision::UnknownAction | Decision::NoGrant => Ok(false),
        }
    }

    /// 范围谓词：own 比较所有者；team / department 比较成员关系，且覆盖本人记录
    pub async fn scope_permits<R>(&self, scope: AccessScope, record: &R) -> AppResult<bool>
    where
        R: ScopedRecord + Sync,
    {
        let owns = record.owner_id() == Some(self.user.id);
        let permitted = match scope {
            AccessScope::All => true,
            AccessScope::Own => owns,
            AccessScope::Team => {
                owns || match record.team_id() {
                    Some(team) => self.membership().await?.team_ids.contains(&team),
                    None => false,
                }
            }
            AccessScope::Department => {
                owns || match record.department_id() {
                    Some(department) => self.membership().await?.department_id == Some(department),
                    None => false,
                }
            }
        };
        Ok(permitted)
    }

    /// 用户可见的导航树：只保留启用的、且用户可执行至少一个动作的节点
    pub async fn accessible_tree(&self) -> AppResult<Vec<ModuleTree>> {
        let trees = self.service.store.module_tree(SyncScope::All).await?;

        if self.is_super_admin().await? {
            return Ok(trees
                .into_iter()
                .filter_map(|tree| filter_tree(tree, |_| true))
                .collect());
        }

        let grants = self.grants().await?;
        if grants.is_empty() {
            return Ok(Vec::new());
        }

        Ok(trees
            .into_iter()
            .filter_map(|tree| filter_tree(tree, |node| grants.resolve(node).is_some()))
            .collect())
    }
}

/// 裁剪一棵模块树，保留 `allowed` 的启用动作及其祖先
pub fn filter_tree<F>(tree: ModuleTree, allowed: F) -> Option<ModuleTree>
where
    F: Fn(&ActionNode) -> bool,
{
    if !tree.module.is_active {
        return None;
    }
    let module_id = tree.module.id;

    let sub_modules: Vec<SubModuleTree> = tree
        .sub_modules
        .into_iter()
        .filter(|sm| sm.sub_module.is_active)
        .filter_map(|sm| {
            let sub_module_id = sm.sub_module.id;
            let components: Vec<ComponentTree> = sm
                .components
                .into_iter()
                .filter(|c| c.component.is_active)
                .filter_map(|c| {
                    let component_id = c.component.id;
                    let actions: Vec<_> = c
                        .actions
                        .into_iter()
                        .filter(|a| {
                            a.is_active
                                && allowed(&ActionNode {
                                    module_id,
                                    sub_module_id,
                                    component_id,
                                    action_id: a.id,
                                })
                        })
                        .collect();
                    (!actions.is_empty()).then_some(ComponentTree {
                        component: c.component,
                        actions,
                    })
                })
                .collect();
            (!components.is_empty()).then_some(SubModuleTree {
                sub_module: sm.sub_module,
                components,
            })
        })
        .collect();

    (!sub_modules.is_empty()).then_some(ModuleTree {
        module: tree.module,
        sub_modules,
    })
}
