//! User repository (数据库访问层)

use uuid::Uuid;

use super::{PgStore, UserRepository};
use crate::{error::AppResult, models::user::*};

impl UserRepository for PgStore {
    /// 根据 ID 查找用户
    async fn find_user(&self, id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    /// 根据邮箱查找用户（不区分大小写）
    async fn find_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(email.trim())
            .fetch_optional(&self.db)
            .await?;

        Ok(user)
    }

    /// 创建用户
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (name, email, password_hash, department_id, is_super_admin, allow_multiple_devices)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(&user.name)
        .bind(user.email.trim())
        .bind(&user.password_hash)
        .bind(user.department_id)
        .bind(user.is_super_admin)
        .bind(user.allow_multiple_devices)
        .fetch_one(&self.db)
        .await?;

        Ok(user)
    }

    /// 记录成功登录
    async fn record_login(&self, id: Uuid, ip: Option<&str>) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET last_login_at = NOW(),
                last_login_ip = $2,
                login_count = login_count + 1,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(ip)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// 锁定或解锁账户
    async fn set_account_lock(&self, id: Uuid, reason: Option<&str>) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET account_locked_at = CASE WHEN $2::text IS NULL THEN NULL ELSE NOW() END,
                locked_reason = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }
}
