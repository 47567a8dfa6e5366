//! 认证服务：设备绑定登录与登出
//!
//! 每个分支（包括失败分支）都写入一条认证事件，事件写入失败时整个请求失败。
//! 限流按客户端 IP 计数，只有凭据错误会占用名额；其余失败会归还本次占位。

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use crate::{
    auth::{
        password::PasswordHasher,
        session::{self, SessionService},
    },
    config::DeviceConfig,
    error::{AppError, AppResult, DeviceConflict},
    models::{
        audit::{AuthEventType, EventStatus, NewAuthEvent, RiskLevel},
        auth::{LoginRequest, LoginResponse, LogoutResponse},
        device::{DeviceInfo, DeviceSummary},
        user::{User, UserResponse},
    },
    repository::{DeviceBindRequest, DeviceBinding, Store},
    services::{
        audit_service::AuditService,
        device_policy::{DeviceDecision, DevicePolicy},
        login_throttle::LoginThrottle,
    },
};

/// 请求侧信息
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// `X-Device-ID` 头
    pub header_device_id: Option<String>,
}

impl ClientContext {
    fn throttle_key(&self) -> &str {
        self.ip.as_deref().unwrap_or("unknown")
    }

    fn event(&self, event_type: AuthEventType, status: EventStatus) -> NewAuthEvent {
        NewAuthEvent::new(event_type, status).client(self.ip.clone(), self.user_agent.clone())
    }
}

/// 已认证会话
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub device_id: String,
}

/// 把客户端上报的设备 ID 规范化为小写带连字符的 UUID
pub fn normalize_device_id(raw: &str) -> Option<String> {
    Uuid::parse_str(raw.trim()).ok().map(|id| id.to_string())
}

pub struct AuthService<S> {
    store: S,
    sessions: Arc<SessionService>,
    throttle: Arc<LoginThrottle>,
    audit: AuditService<S>,
    hasher: PasswordHasher,
    devices: DeviceConfig,
}

impl<S: Store> AuthService<S> {
    pub fn new(
        store: S,
        sessions: Arc<SessionService>,
        throttle: Arc<LoginThrottle>,
        devices: DeviceConfig,
    ) -> Self {
        Self {
            audit: AuditService::new(store.clone()),
            store,
            sessions,
            throttle,
            hasher: PasswordHasher::new(),
            devices,
        }
    }

    /// 替换密码哈希参数（测试使用低成本参数）
    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// 用户登录
    pub async fn login(&self, req: LoginRequest, client: &ClientContext) -> AppResult<LoginResponse> {
        let key = client.throttle_key().to_string();
        let email = req.email.trim().to_string();

        // 1. 限流（检查与占位是原子操作）
        if let Err(retry_after) = self.throttle.attempt(&key) {
            self.audit
                .record(
                    client
                        .event(AuthEventType::LoginRateLimited, EventStatus::Blocked)
                        .risk(RiskLevel::Medium)
                        .metadata(json!({ "email": email, "retry_after": retry_after })),
                )
                .await?;
            tracing::warn!(ip = %key, retry_after, "Login rate limited");
            return Err(AppError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        // 2. 凭据
        let user = self.store.find_user_by_email(&email).await?;
        let user = match user {
            Some(user) if self.hasher.verify(&req.password, &user.password_hash) => user,
            other => {
                let mut event = client
                    .event(AuthEventType::LoginFailed, EventStatus::Failed)
                    .metadata(json!({ "email": email, "reason": "invalid_credentials" }));
                if let Some(user) = &other {
                    event = event.user(user.id);
                }
                self.audit.record(event).await?;
                tracing::info!(ip = %key, "Login failed: invalid credentials");
                return Err(AppError::InvalidCredentials);
            }
        };

        // 3. 账户锁定
        if user.is_locked() {
            self.throttle.release(&key);
            self.audit
                .record(
                    client
                        .event(AuthEventType::LoginAccountLocked, EventStatus::Blocked)
                        .user(user.id)
                        .risk(RiskLevel::Medium),
                )
                .await?;
            let reason = user
                .locked_reason
                .clone()
                .unwrap_or_else(|| "Account is locked".to_string());
            return Err(AppError::AccountLocked(reason));
        }

        // 4. 设备标识必填
        let raw_device_id = req.device_id.clone().or_else(|| client.header_device_id.clone());
        let Some(device_id) = raw_device_id.as_deref().and_then(normalize_device_id) else {
            self.throttle.release(&key);
            self.audit
                .record(
                    client
                        .event(AuthEventType::LoginDeviceMissing, EventStatus::Failed)
                        .user(user.id)
                        .device(raw_device_id.clone()),
                )
                .await?;
            return Err(AppError::validation("A valid device_id (UUID) is required"));
        };

        // 5. 设备绑定
        let device_token = session::generate_token();
        let bind = DeviceBindRequest {
            device_id: device_id.clone(),
            info: DeviceInfo::from_request(
                client.user_agent.as_deref(),
                client.ip.clone(),
                req.device_name.clone(),
            ),
            policy: DevicePolicy {
                max_active_devices: self.devices.max_active_devices,
                allow_multiple_devices: user.allow_multiple_devices,
            },
            rotate_token: self.devices.rotate_token_on_login,
            token_hash: session::hash_token(&device_token),
            session_id: Uuid::new_v4(),
        };

        let (device, decision, token_issued) = match self.store.bind_device(user.id, &bind).await? {
            DeviceBinding::Blocked(conflicting) => {
                self.throttle.release(&key);
                return Err(self.device_blocked(&user, &device_id, conflicting, client).await?);
            }
            DeviceBinding::Bound {
                device,
                decision,
                token_issued,
            } => (device, decision, token_issued),
        };

        // 6. 会话
        let issued = self
            .sessions
            .issue(user.id, bind.session_id, &device_id, req.remember)?;

        self.store.record_login(user.id, client.ip.as_deref()).await?;
        self.throttle.clear(&key);

        if let DeviceDecision::Register { trust } = decision {
            self.audit
                .record(
                    client
                        .event(AuthEventType::DeviceRegistered, EventStatus::Success)
                        .user(user.id)
                        .device(Some(device_id.clone()))
                        .metadata(json!({ "trusted": trust, "device_name": device.device_name })),
                )
                .await?;
        }

        self.audit
            .record(
                client
                    .event(AuthEventType::LoginSuccess, EventStatus::Success)
                    .user(user.id)
                    .device(Some(device_id.clone()))
                    .metadata(json!({ "remember": req.remember })),
            )
            .await?;

        tracing::info!(user_id = %user.id, device_id = %device_id, "Login succeeded");

        // 重新读取以带上最新的登录统计
        let user = self
            .store
            .find_user(user.id)
            .await?
            .ok_or_else(|| AppError::not_found("user"))?;

        Ok(LoginResponse {
            access_token: issued.token,
            token_type: "Bearer",
            expires_in: issued.expires_in,
            csrf_token: session::generate_token(),
            device_token: token_issued.then_some(device_token),
            device: DeviceSummary::from(&device),
            user: UserResponse::from(user),
        })
    }

    async fn device_blocked(
        &self,
        user: &User,
        device_id: &str,
        conflicting: DeviceSummary,
        client: &ClientContext,
    ) -> AppResult<AppError> {
        self.audit
            .record(
                client
                    .event(AuthEventType::LoginDeviceBlocked, EventStatus::Blocked)
                    .user(user.id)
                    .device(Some(device_id.to_string()))
                    .risk(RiskLevel::High)
                    .metadata(json!({
                        "conflicting_device_id": conflicting.device_id,
                        "conflicting_device_name": conflicting.device_name,
                    })),
            )
            .await?;

        tracing::warn!(
            user_id = %user.id,
            device_id = %device_id,
            conflicting_device_id = %conflicting.device_id,
            "Login blocked by device binding"
        );

        let name = conflicting
            .device_name
            .clone()
            .unwrap_or_else(|| "another device".to_string());
        Ok(AppError::DeviceConflict(Box::new(DeviceConflict {
            message: format!(
                "This account is already active on {}. Sign out there or deactivate that device before signing in here.",
                name
            ),
            conflicting_device: conflicting,
        })))
    }

    /// 登出当前会话绑定的设备
    pub async fn logout(
        &self,
        session: &SessionContext,
        reported_device_id: Option<&str>,
        client: &ClientContext,
    ) -> AppResult<LogoutResponse> {
        let target = match reported_device_id {
            Some(raw) => match normalize_device_id(raw) {
                Some(id) => id,
                None => {
                    self.logout_failed(session, Some(raw), "invalid_device_id", client)
                        .await?;
                    return Err(AppError::validation("device_id must be a UUID"));
                }
            },
            None => session.device_id.clone(),
        };
        if target != session.device_id {
            self.logout_failed(session, Some(&target), "device_mismatch", client)
                .await?;
            return Err(AppError::validation(
                "device_id does not match the current session",
            ));
        }

        if self
            .store
            .deactivate_device(session.user_id, &target)
            .await?
            .is_none()
        {
            self.logout_failed(session, Some(&target), "device_not_found", client)
                .await?;
            return Err(AppError::not_found("device"));
        }

        self.audit
            .record(
                client
                    .event(AuthEventType::Logout, EventStatus::Success)
                    .user(session.user_id)
                    .device(Some(target.clone())),
            )
            .await?;

        tracing::info!(user_id = %session.user_id, device_id = %target, "Logged out");

        Ok(LogoutResponse {
            message: "Logged out",
            csrf_token: session::generate_token(),
        })
    }

    async fn logout_failed(
        &self,
        session: &SessionContext,
        reported_device_id: Option<&str>,
        reason: &str,
        client: &ClientContext,
    ) -> AppResult<()> {
        self.audit
            .record(
                client
                    .event(AuthEventType::Logout, EventStatus::Failed)
                    .user(session.user_id)
                    .device(reported_device_id.map(str::to_string))
                    .metadata(json!({
                        "reason": reason,
                        "session_device_id": session.device_id,
                    })),
            )
            .await?;
        tracing::info!(user_id = %session.user_id, reason, "Logout rejected");
        Ok(())
    }

    /// 校验会话令牌并确认设备仍绑定该会话
    pub async fn authenticate(&self, token: &str) -> AppResult<(User, SessionContext)> {
        let claims = self.sessions.validate(token)?;
        let user_id = claims.user_id()?;
        let session_id = claims.session_id()?;

        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;
        if user.is_locked() {
            return Err(AppError::Unauthorized);
        }

        let device = self
            .store
            .find_device(user_id, &claims.device_id)
            .await?
            .ok_or(AppError::Unauthorized)?;
        if !device.is_active || device.current_session_id != Some(session_id) {
            tracing::debug!(user_id = %user_id, "Session no longer bound to an active device");
            return Err(AppError::Unauthorized);
        }

        Ok((
            user,
            SessionContext {
                user_id,
                session_id,
                device_id: claims.device_id,
            },
        ))
    }
}
