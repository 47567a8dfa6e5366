//! Device repository (设备绑定数据访问)

use uuid::Uuid;

use super::{DeviceBindRequest, DeviceBinding, DeviceRepository, PgStore};
use crate::{
    error::{AppError, AppResult},
    models::device::UserDevice,
    services::device_policy::{self, DeviceDecision},
};

impl DeviceRepository for PgStore {
    /// 设备绑定：锁定用户行后读取设备、做出决策并写入，整个过程在同一事务内
    async fn bind_device(&self, user_id: Uuid, req: &DeviceBindRequest) -> AppResult<DeviceBinding> {
        let mut tx = self.db.begin().await?;

        // 串行化同一用户的并发登录
        let locked = sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(AppError::not_found("user"));
        }

        let devices = sqlx::query_as::<_, UserDevice>(
            "SELECT * FROM user_devices WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&mut *tx)
        .await?;

        let decision = device_policy::decide(&devices, &req.device_id, req.policy);
        let info = &req.info;

        let (device, token_issued) = match &decision {
            DeviceDecision::Blocked { conflicting } => {
                return Ok(DeviceBinding::Blocked(conflicting.clone()));
            }
            DeviceDecision::Register { trust } => {
                let device = sqlx::query_as::<_, UserDevice>(
                    r#"
                    INSERT INTO user_devices (
                        user_id, device_id, device_name, browser, platform, ip_address, user_agent,
                        device_token_hash, current_session_id, is_active, is_trusted, last_used_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE, $10, NOW())
                    RETURNING *
                    "#,
                )
                .bind(user_id)
                .bind(&req.device_id)
                .bind(&info.device_name)
                .bind(&info.browser)
                .bind(&info.platform)
                .bind(&info.ip_address)
                .bind(&info.user_agent)
                .bind(&req.token_hash)
                .bind(req.session_id)
                .bind(*trust)
                .fetch_one(&mut *tx)
                .await?;
                (device, true)
            }
            DeviceDecision::Reuse { id } => {
                let device = sqlx::query_as::<_, UserDevice>(
                    r#"
                    UPDATE user_devices
                    SET device_name = COALESCE($2, device_name),
                        browser = COALESCE($3, browser),
                        platform = COALESCE($4, platform),
                        ip_address = $5,
                        user_agent = $6,
                        device_token_hash = CASE WHEN $7 THEN $8 ELSE device_token_hash END,
                        current_session_id = $9,
                        last_used_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(&info.device_name)
                .bind(&info.browser)
                .bind(&info.platform)
                .bind(&info.ip_address)
                .bind(&info.user_agent)
                .bind(req.rotate_token)
                .bind(&req.token_hash)
                .bind(req.session_id)
                .fetch_one(&mut *tx)
                .await?;
                (device, req.rotate_token)
            }
            DeviceDecision::Reactivate { id, trust } => {
                let device = sqlx::query_as::<_, UserDevice>(
                    r#"
                    UPDATE user_devices
                    SET device_name = COALESCE($2, device_name),
                        browser = COALESCE($3, browser),
                        platform = COALESCE($4, platform),
                        ip_address = $5,
                        user_agent = $6,
                        device_token_hash = $7,
                        current_session_id = $8,
                        is_active = TRUE,
                        is_trusted = $9,
                        last_used_at = NOW(),
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(&info.device_name)
                .bind(&info.browser)
                .bind(&info.platform)
                .bind(&info.ip_address)
                .bind(&info.user_agent)
                .bind(&req.token_hash)
                .bind(req.session_id)
                .bind(*trust)
                .fetch_one(&mut *tx)
                .await?;
                (device, true)
            }
        };

        tx.commit().await?;

        Ok(DeviceBinding::Bound {
            device,
            decision,
            token_issued,
        })
    }

    async fn devices_of_user(&self, user_id: Uuid) -> AppResult<Vec<UserDevice>> {
        let devices = sqlx::query_as::<_, UserDevice>(
            "SELECT * FROM user_devices WHERE user_id = $1 ORDER BY last_used_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?;

        Ok(devices)
    }

    async fn find_device(&self, user_id: Uuid, device_id: &str) -> AppResult<Option<UserDevice>> {
        let device = sqlx::query_as::<_, UserDevice>(
            "SELECT * FROM user_devices WHERE user_id = $1 AND device_id = $2",
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(device)
    }

    /// 停用设备并使其会话失效
    async fn deactivate_device(&self, user_id: Uuid, device_id: &str) -> AppResult<Option<UserDevice>> {
        let device = sqlx::query_as::<_, UserDevice>(
            r#"
            UPDATE user_devices
            SET is_active = FALSE, current_session_id = NULL, updated_at = NOW()
            WHERE user_id = $1 AND device_id = $2
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(device)
    }

    async fn set_device_trust(
        &self,
        user_id: Uuid,
        device_id: &str,
        trusted: bool,
    ) -> AppResult<Option<UserDevice>> {
        let device = sqlx::query_as::<_, UserDevice>(
            r#"
            UPDATE user_devices
            SET is_trusted = $3, updated_at = NOW()
            WHERE user_id = $1 AND device_id = $2
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(device_id)
        .bind(trusted)
        .fetch_optional(&self.db)
        .await?;

        Ok(device)
    }
}
