//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::net::IpAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（使用 Secret 包装，防止日志泄露）
    pub url: Secret<String>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub acquire_timeout_secs: u64,
    /// 空闲连接超时时间（秒）
    pub idle_timeout_secs: u64,
    /// 连接最大生命周期（秒）
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// 会话令牌签名密钥
    pub session_secret: Secret<String>,
    /// 会话有效期（秒）
    pub session_ttl_secs: u64,
    /// 勾选“记住我”时的会话有效期（秒）
    pub remember_session_ttl_secs: u64,
    /// 每个 IP 在窗口内允许的失败登录次数
    pub login_max_attempts: u32,
    /// 失败登录计数窗口（秒）
    pub login_decay_secs: u64,
    /// 是否信任反向代理转发的 X-Forwarded-For 头
    pub trust_proxy: bool,
    /// 受信任的代理地址；只有来自这些地址的连接才会读取转发头
    #[serde(default)]
    pub trusted_proxies: Vec<IpAddr>,
    /// IP 白名单（可选）
    pub allowed_ips: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// 每个用户同时允许的活跃设备数（用户级多设备例外除外）
    pub max_active_devices: u32,
    /// 每次登录时轮换设备令牌
    pub rotate_token_on_login: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorizationConfig {
    /// 绕过所有授权检查的受保护角色名
    pub super_admin_role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TenancyConfig {
    /// 当前租户上下文；设置即表示运行在租户上下文中
    pub tenant_id: Option<String>,
    /// 中心库（landlord）标记表
    pub landlord_marker_table: String,
}

impl TenancyConfig {
    /// 当前是否处于租户上下文
    pub fn tenant_context_active(&self) -> bool {
        self.tenant_id
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModulesConfig {
    /// 模块清单目录，每个包一个子目录，内含 module.json
    pub manifest_dirs: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub devices: DeviceConfig,
    pub authorization: AuthorizationConfig,
    pub tenancy: TenancyConfig,
    pub modules: ModulesConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("server.addr", "0.0.0.0:3000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("security.session_secret", "change-this-secret-in-production-min-32-chars!")?
            .set_default("security.session_ttl_secs", 7200)?
            .set_default("security.remember_session_ttl_secs", 2592000)?
            .set_default("security.login_max_attempts", 5)?
            .set_default("security.login_decay_secs", 60)?
            .set_default("security.trust_proxy", false)?
            .set_default("devices.max_active_devices", 1)?
            .set_default("devices.rotate_token_on_login", true)?
            .set_default("authorization.super_admin_role", "Super Administrator")?
            .set_default("tenancy.landlord_marker_table", "tenants")?
            .set_default("modules.manifest_dirs", vec!["modules"])?;

        // 从环境变量加载配置（前缀为 ERP_）
        settings = settings.add_source(
            Environment::with_prefix("ERP")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("security.allowed_ips")
                .with_list_parse_key("security.trusted_proxies")
                .with_list_parse_key("modules.manifest_dirs")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    fn validate(&self) -> Result<(), ConfigError> {
        // 验证端口范围
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port != 0 && port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        // 验证数据库连接池配置
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        // 验证会话密钥长度（至少 32 字符）
        if self.security.session_secret.expose_secret().len() < 32 {
            return Err(ConfigError::Message(
                "Session secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.security.session_ttl_secs < 60 {
            return Err(ConfigError::Message(
                "session_ttl_secs must be at least 60".to_string(),
            ));
        }

        if self.security.login_max_attempts < 1 || self.security.login_max_attempts > 100 {
            return Err(ConfigError::Message(
                "login_max_attempts must be between 1 and 100".to_string(),
            ));
        }

        if self.security.login_decay_secs == 0 {
            return Err(ConfigError::Message(
                "login_decay_secs must be greater than 0".to_string(),
            ));
        }

        if self.security.trust_proxy && self.security.trusted_proxies.is_empty() {
            return Err(ConfigError::Message(
                "trust_proxy requires at least one entry in trusted_proxies".to_string(),
            ));
        }

        if self.devices.max_active_devices < 1 {
            return Err(ConfigError::Message(
                "max_active_devices must be at least 1".to_string(),
            ));
        }

        if self.authorization.super_admin_role.trim().is_empty() {
            return Err(ConfigError::Message(
                "super_admin_role must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
