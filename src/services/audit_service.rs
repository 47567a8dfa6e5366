//! 认证事件服务
//!
//! 事件只追加不修改。写入失败向上传播，不静默吞掉。

use crate::{
    error::{AppError, AppResult},
    models::audit::{AuthEventFilters, AuthenticationEvent, NewAuthEvent},
    repository::Store,
};

pub struct AuditService<S> {
    store: S,
}

impl<S: Store> AuditService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// 记录一条认证事件
    pub async fn record(&self, event: NewAuthEvent) -> AppResult<AuthenticationEvent> {
        let event = self.store.record_event(event).await?;

        metrics::counter!(
            "auth_events_total",
            "event_type" => event.event_type.as_str(),
            "status" => event.status.as_str()
        )
        .increment(1);

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            status = %event.status,
            risk_level = %event.risk_level,
            user_id = ?event.user_id,
            device_id = ?event.device_id,
            "Authentication event recorded"
        );
        Ok(event)
    }

    /// 查询事件（最新在前）
    pub async fn query(&self, filters: &AuthEventFilters) -> AppResult<Vec<AuthenticationEvent>> {
        if let (Some(start), Some(end)) = (filters.start_time, filters.end_time) {
            if start > end {
                return Err(AppError::validation("start_time must not be after end_time"));
            }
        }
        self.store.query_events(filters).await
    }
}
