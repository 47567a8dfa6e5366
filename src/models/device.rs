//! Device binding models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A device registered to a user
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserDevice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub device_id: String,
    pub device_name: Option<String>,
    pub browser: Option<String>,
    pub platform: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// SHA-256 of the server-issued device token; the raw token is only ever returned once
    #[serde(skip_serializing)]
    pub device_token_hash: String,
    #[serde(skip_serializing)]
    pub current_session_id: Option<Uuid>,
    pub is_active: bool,
    pub is_trusted: bool,
    pub last_used_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Display metadata of a device. Safe to show to the account owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: Uuid,
    pub device_id: String,
    pub device_name: Option<String>,
    pub browser: Option<String>,
    pub platform: Option<String>,
    pub ip_address: Option<String>,
    pub is_active: bool,
    pub is_trusted: bool,
    pub last_used_at: DateTime<Utc>,
}

impl From<&UserDevice> for DeviceSummary {
    fn from(device: &UserDevice) -> Self {
        Self {
            id: device.id,
            device_id: device.device_id.clone(),
            device_name: device.device_name.clone(),
            browser: device.browser.clone(),
            platform: device.platform.clone(),
            ip_address: device.ip_address.clone(),
            is_active: device.is_active,
            is_trusted: device.is_trusted,
            last_used_at: device.last_used_at,
        }
    }
}

/// Client-side facts about the device a login comes from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    pub device_name: Option<String>,
    pub browser: Option<String>,
    pub platform: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl DeviceInfo {
    /// Derive browser and platform from a user agent string
    pub fn from_request(
        user_agent: Option<&str>,
        ip_address: Option<String>,
        device_name: Option<String>,
    ) -> Self {
        let browser = user_agent.and_then(detect_browser).map(str::to_string);
        let platform = user_agent.and_then(detect_platform).map(str::to_string);
        let device_name = device_name
            .filter(|n| !n.trim().is_empty())
            .or_else(|| match (&browser, &platform) {
                (Some(b), Some(p)) => Some(format!("{} on {}", b, p)),
                (Some(b), None) => Some(b.clone()),
                (None, Some(p)) => Some(p.clone()),
                (None, None) => None,
            });

        Self {
            device_name,
            browser,
            platform,
            ip_address,
            user_agent: user_agent.map(str::to_string),
        }
    }
}

// Order matters: Edge and Opera UAs also contain "Chrome", Chrome UAs contain "Safari".
fn detect_browser(ua: &str) -> Option<&'static str> {
    const BROWSERS: [(&str, &str); 6] = [
        ("Edg/", "Edge"),
        ("OPR/", "Opera"),
        ("Firefox/", "Firefox"),
        ("Chrome/", "Chrome"),
        ("Safari/", "Safari"),
        ("curl/", "curl"),
    ];
    BROWSERS
        .iter()
        .find(|(needle, _)| ua.contains(needle))
        .map(|(_, name)| *name)
}

fn detect_platform(ua: &str) -> Option<&'static str> {
    const PLATFORMS: [(&str, &str); 6] = [
        ("Android", "Android"),
        ("iPhone", "iOS"),
        ("iPad", "iOS"),
        ("Windows", "Windows"),
        ("Mac OS X", "macOS"),
        ("Linux", "Linux"),
    ];
    PLATFORMS
        .iter()
        .find(|(needle, _)| ua.contains(needle))
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_info_from_chrome_on_windows() {
        let ua = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";
        let info = DeviceInfo::from_request(Some(ua), Some("1.2.3.4".to_string()), None);
        assert_eq!(info.browser.as_deref(), Some("Chrome"));
        assert_eq!(info.platform.as_deref(), Some("Windows"));
        assert_eq!(info.device_name.as_deref(), Some("Chrome on Windows"));
    }

    #[test]
    fn test_explicit_device_name_wins() {
        let info = DeviceInfo::from_request(
            Some("Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0"),
            None,
            Some("Work laptop".to_string()),
        );
        assert_eq!(info.device_name.as_deref(), Some("Work laptop"));
        assert_eq!(info.browser.as_deref(), Some("Firefox"));
    }

    #[test]
    fn test_summary_serialization_has_no_token() {
        let device = UserDevice {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            device_id: Uuid::new_v4().to_string(),
            device_name: Some("Phone".to_string()),
            browser: None,
            platform: None,
            ip_address: None,
            user_agent: None,
            device_token_hash: "secret-hash".to_string(),
            current_session_id: Some(Uuid::new_v4()),
            is_active: true,
            is_trusted: true,
            last_used_at: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&device).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(!json.contains("current_session_id"));

        let json = serde_json::to_string(&DeviceSummary::from(&device)).unwrap();
        assert!(!json.contains("token"));
    }
}
