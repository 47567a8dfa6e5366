//! Authentication event models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ParseEnumError;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $label:literal { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $value),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($value => Ok($name::$variant),)+
                    other => Err(ParseEnumError::new($label, other)),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParseEnumError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

string_enum!(
    /// Diagnostic type of an authentication event
    AuthEventType, "auth event type" {
        LoginSuccess => "login_success",
        LoginFailed => "login_failed",
        LoginRateLimited => "login_rate_limited",
        LoginAccountLocked => "login_account_locked",
        LoginDeviceMissing => "login_device_missing",
        LoginDeviceBlocked => "login_device_blocked",
        DeviceRegistered => "device_registered",
        DeviceDeactivated => "device_deactivated",
        Logout => "logout",
        AccountLocked => "account_locked",
        AccountUnlocked => "account_unlocked",
    }
);

string_enum!(
    EventStatus, "event status" {
        Success => "success",
        Failed => "failed",
        Blocked => "blocked",
    }
);

string_enum!(
    RiskLevel, "risk level" {
        Low => "low",
        Medium => "medium",
        High => "high",
    }
);

/// Append-only authentication event
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuthenticationEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    #[sqlx(try_from = "String")]
    pub event_type: AuthEventType,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: EventStatus,
    #[sqlx(try_from = "String")]
    pub risk_level: RiskLevel,
    pub metadata: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

/// Event to be recorded
#[derive(Debug, Clone)]
pub struct NewAuthEvent {
    pub user_id: Option<Uuid>,
    pub event_type: AuthEventType,
    pub status: EventStatus,
    pub risk_level: RiskLevel,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub metadata: serde_json::Value,
}

impl NewAuthEvent {
    pub fn new(event_type: AuthEventType, status: EventStatus) -> Self {
        Self {
            user_id: None,
            event_type,
            status,
            risk_level: RiskLevel::Low,
            ip_address: None,
            user_agent: None,
            device_id: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }

    pub fn device(mut self, device_id: Option<String>) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn into_event(self) -> AuthenticationEvent {
        AuthenticationEvent {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            event_type: self.event_type,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            device_id: self.device_id,
            status: self.status,
            risk_level: self.risk_level,
            metadata: self.metadata,
            occurred_at: Utc::now(),
        }
    }
}

/// Authentication event filters
#[derive(Debug, Default, Deserialize)]
pub struct AuthEventFilters {
    pub user_id: Option<Uuid>,
    pub event_type: Option<AuthEventType>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl AuthEventFilters {
    pub const DEFAULT_LIMIT: i64 = 100;
    pub const MAX_LIMIT: i64 = 1000;

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn matches(&self, event: &AuthenticationEvent) -> bool {
        self.user_id.map_or(true, |id| event.user_id == Some(id))
            && self.event_type.map_or(true, |t| event.event_type == t)
            && self.start_time.map_or(true, |t| event.occurred_at >= t)
            && self.end_time.map_or(true, |t| event.occurred_at <= t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_string_forms() {
        assert_eq!(AuthEventType::LoginDeviceBlocked.as_str(), "login_device_blocked");
        assert_eq!(
            "login_rate_limited".parse::<AuthEventType>().unwrap(),
            AuthEventType::LoginRateLimited
        );
        assert!("unknown".parse::<AuthEventType>().is_err());
    }

    #[test]
    fn test_filters_match() {
        let user_id = Uuid::new_v4();
        let event = NewAuthEvent::new(AuthEventType::LoginFailed, EventStatus::Failed)
            .user(user_id)
            .into_event();

        let filters = AuthEventFilters {
            user_id: Some(user_id),
            event_type: Some(AuthEventType::LoginFailed),
            ..Default::default()
        };
        assert!(filters.matches(&event));

        let filters = AuthEventFilters {
            event_type: Some(AuthEventType::LoginSuccess),
            ..Default::default()
        };
        assert!(!filters.matches(&event));
    }

    #[test]
    fn test_limit_is_clamped() {
        let filters = AuthEventFilters {
            limit: Some(50_000),
            ..Default::default()
        };
        assert_eq!(filters.effective_limit(), AuthEventFilters::MAX_LIMIT);
        assert_eq!(AuthEventFilters::default().effective_limit(), 100);
    }
}
