//! Audit repository (认证事件数据访问)

use super::{AuditRepository, PgStore};
use crate::{error::AppResult, models::audit::*};

impl AuditRepository for PgStore {
    /// 写入认证事件（只追加）
    async fn record_event(&self, event: NewAuthEvent) -> AppResult<AuthenticationEvent> {
        let event = event.into_event();

        let stored = sqlx::query_as::<_, AuthenticationEvent>(
            r#"
            INSERT INTO authentication_events (
                id, user_id, event_type, ip_address, user_agent, device_id, status, risk_level, metadata, occurred_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.event_type.as_str())
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(&event.device_id)
        .bind(event.status.as_str())
        .bind(event.risk_level.as_str())
        .bind(&event.metadata)
        .bind(event.occurred_at)
        .fetch_one(&self.db)
        .await?;

        Ok(stored)
    }

    /// 查询认证事件（按时间倒序）
    async fn query_events(&self, filters: &AuthEventFilters) -> AppResult<Vec<AuthenticationEvent>> {
        let mut query = String::from("SELECT * FROM authentication_events WHERE 1=1");
        let mut index = 0;

        if filters.user_id.is_some() {
            index += 1;
            query.push_str(&format!(" AND user_id = ${}", index));
        }
        if filters.event_type.is_some() {
            index += 1;
            query.push_str(&format!(" AND event_type = ${}", index));
        }
        if filters.start_time.is_some() {
            index += 1;
            query.push_str(&format!(" AND occurred_at >= ${}", index));
        }
        if filters.end_time.is_some() {
            index += 1;
            query.push_str(&format!(" AND occurred_at <= ${}", index));
        }
        index += 1;
        query.push_str(&format!(" ORDER BY occurred_at DESC LIMIT ${}", index));

        let mut q = sqlx::query_as::<_, AuthenticationEvent>(&query);
        if let Some(user_id) = filters.user_id {
            q = q.bind(user_id);
        }
        if let Some(event_type) = filters.event_type {
            q = q.bind(event_type.as_str());
        }
        if let Some(start_time) = filters.start_time {
            q = q.bind(start_time);
        }
        if let Some(end_time) = filters.end_time {
            q = q.bind(end_time);
        }
        q = q.bind(filters.effective_limit());

        let events = q.fetch_all(&self.db).await?;
        Ok(events)
    }
}
