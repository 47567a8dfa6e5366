//! 设备绑定决策
//!
//! 纯函数，不做 IO。调用方必须在持有用户行锁的事务中读取设备列表后再调用，
//! 这样“是否为首台设备”的判断与后续写入之间不存在竞争窗口。

use uuid::Uuid;

use crate::models::device::{DeviceSummary, UserDevice};

/// 设备绑定策略
#[derive(Debug, Clone, Copy)]
pub struct DevicePolicy {
    /// 同时活跃设备上限
    pub max_active_devices: u32,
    /// 用户级多设备例外
    pub allow_multiple_devices: bool,
}

impl DevicePolicy {
    fn limit(&self) -> usize {
        if self.allow_multiple_devices {
            usize::MAX
        } else {
            self.max_active_devices.max(1) as usize
        }
    }
}

/// 一次登录对设备表的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceDecision {
    /// 新设备，插入一行
    Register { trust: bool },
    /// 已绑定的活跃设备
    Reuse { id: Uuid },
    /// 之前被停用的设备，重新启用
    Reactivate { id: Uuid, trust: bool },
    /// 与其他活跃设备冲突
    Blocked { conflicting: DeviceSummary },
}

impl DeviceDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, DeviceDecision::Blocked { .. })
    }
}

/// 判断 `device_id` 能否为该用户登录
pub fn decide(devices: &[UserDevice], device_id: &str, policy: DevicePolicy) -> DeviceDecision {
    let existing = devices.iter().find(|d| d.device_id == device_id);

    if let Some(device) = existing.filter(|d| d.is_active) {
        return DeviceDecision::Reuse { id: device.id };
    }

    let mut others: Vec<&UserDevice> = devices
        .iter()
        .filter(|d| d.is_active && d.device_id != device_id)
        .collect();

    if others.len() >= policy.limit() {
        // 返回最近使用的那台，便于用户辨认并停用
        others.sort_by(|a, b| b.last_used_at.cmp(&a.last_used_at));
        return DeviceDecision::Blocked {
            conflicting: DeviceSummary::from(others[0]),
        };
    }

    // 没有其他活跃的受信设备时，本设备成为受信设备
    let trust = !others.iter().any(|d| d.is_trusted);

    match existing {
        Some(device) => DeviceDecision::Reactivate {
            id: device.id,
            trust: trust || device.is_trusted,
        },
        None => DeviceDecision::Register { trust },
    }
}
