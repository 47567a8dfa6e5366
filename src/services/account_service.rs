//! 账户与设备管理服务
//!
//! 用户总能管理自己的设备；管理他人设备或锁定账户需要 `core.security` 下的授权。

use serde_json::json;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{
        audit::{AuthEventType, EventStatus, NewAuthEvent, RiskLevel},
        device::DeviceSummary,
        user::User,
    },
    repository::Store,
    services::{
        audit_service::AuditService,
        authorization_service::{Authorizer, MembershipResolver, RecordScope},
        policy::{self, core_actions},
    },
};

pub struct AccountService<S> {
    store: S,
    audit: AuditService<S>,
}

impl<S: Store> AccountService<S> {
    pub fn new(store: S) -> Self {
        Self {
            audit: AuditService::new(store.clone()),
            store,
        }
    }

    async fn user(&self, user_id: Uuid) -> AppResult<User> {
        self.store
            .find_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found("user"))
    }

    /// 本人的设备列表，不含令牌
    pub async fn my_devices(&self, user_id: Uuid) -> AppResult<Vec<DeviceSummary>> {
        let devices = self.store.devices_of_user(user_id).await?;
        Ok(devices.iter().map(DeviceSummary::from).collect())
    }

    /// 停用设备：本人直接放行，他人设备需要授权
    pub async fn deactivate_device<M>(
        &self,
        authorizer: &Authorizer<'_, S, M>,
        owner_id: Uuid,
        device_id: &str,
    ) -> AppResult<DeviceSummary>
    where
        M: MembershipResolver + Sync,
    {
        // 先按设备所有者授权，未授权的调用方看不到设备是否存在
        let department_id = self
            .store
            .find_user(owner_id)
            .await?
            .and_then(|owner| owner.department_id);
        let owner_scope = RecordScope {
            owner_id: Some(owner_id),
            team_id: None,
            department_id,
        };
        policy::require_record(authorizer, &core_actions::deactivate_devices(), &owner_scope)
            .await?;

        let device = self
            .store
            .deactivate_device(owner_id, device_id)
            .await?
            .ok_or_else(|| AppError::not_found("device"))?;

        let actor = authorizer.user().id;
        self.audit
            .record(
                NewAuthEvent::new(AuthEventType::DeviceDeactivated, EventStatus::Success)
                    .user(owner_id)
                    .device(Some(device.device_id.clone()))
                    .metadata(json!({ "actor_id": actor })),
            )
            .await?;

        tracing::info!(
            owner_id = %owner_id,
            device_id = %device.device_id,
            actor_id = %actor,
            "Device deactivated"
        );
        Ok(DeviceSummary::from(&device))
    }

    /// 设置本人设备的受信标记
    pub async fn set_trust(
        &self,
        user_id: Uuid,
        device_id: &str,
        trusted: bool,
    ) -> AppResult<DeviceSummary> {
        let device = self
            .store
            .set_device_trust(user_id, device_id, trusted)
            .await?
            .ok_or_else(|| AppError::not_found("device"))?;
        Ok(DeviceSummary::from(&device))
    }

    /// 锁定账户
    pub async fn lock<M>(
        &self,
        authorizer: &Authorizer<'_, S, M>,
        target_id: Uuid,
        reason: &str,
    ) -> AppResult<User>
    where
        M: MembershipResolver + Sync,
    {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(AppError::validation("A lock reason is required"));
        }
        let target = self.user(target_id).await?;
        if target.id == authorizer.user().id {
            return Err(AppError::validation("You cannot lock your own account"));
        }
        self.require_scoped(authorizer, core_actions::lock_accounts(), &target)
            .await?;

        let user = self
            .store
            .set_account_lock(target_id, Some(reason))
            .await?
            .ok_or_else(|| AppError::not_found("user"))?;

        self.audit
            .record(
                NewAuthEvent::new(AuthEventType::AccountLocked, EventStatus::Success)
                    .user(target_id)
                    .risk(RiskLevel::Medium)
                    .metadata(json!({ "actor_id": authorizer.user().id, "reason": reason })),
            )
            .await?;

        tracing::warn!(user_id = %target_id, actor_id = %authorizer.user().id, "Account locked");
        Ok(user)
    }

    /// 解锁账户
    pub async fn unlock<M>(&self, authorizer: &Authorizer<'_, S, M>, target_id: Uuid) -> AppResult<User>
    where
        M: MembershipResolver + Sync,
    {
        let target = self.user(target_id).await?;
        self.require_scoped(authorizer, core_actions::unlock_accounts(), &target)
            .await?;

        let user = self
            .store
            .set_account_lock(target_id, None)
            .await?
            .ok_or_else(|| AppError::not_found("user"))?;

        self.audit
            .record(
                NewAuthEvent::new(AuthEventType::AccountUnlocked, EventStatus::Success)
                    .user(target_id)
                    .metadata(json!({ "actor_id": authorizer.user().id })),
            )
            .await?;

        tracing::info!(user_id = %target_id, actor_id = %authorizer.user().id, "Account unlocked");
        Ok(user)
    }

    // 账户锁定不走所有者快捷通道
    async fn require_scoped<M>(
        &self,
        authorizer: &Authorizer<'_, S, M>,
        path: crate::models::module::ActionPath,
        target: &User,
    ) -> AppResult<()>
    where
        M: MembershipResolver + Sync,
    {
        if authorizer.can_with_scope(&path, target).await? {
            Ok(())
        } else {
            Err(AppError::Forbidden)
        }
    }
}
