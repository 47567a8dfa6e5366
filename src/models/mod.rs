//! 数据模型模块
//! 模块层级、角色授权、用户设备与认证事件

pub mod audit;
pub mod auth;
pub mod device;
pub mod ids;
pub mod manifest;
pub mod module;
pub mod role;
pub mod sync;
pub mod user;

use thiserror::Error;

/// 字符串列无法解析为枚举值
#[derive(Debug, Clone, Error)]
#[error("invalid {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
