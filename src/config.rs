//! 服务配置模块
//!
//! 每个进程一份 `ServiceConf`：服务名、两个角色（HTTP / gRPC）的监听参数、
//! 注册中心地址和健康检查周期。端口为 0 表示对应角色关闭。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 健康检查超时缺省值（秒）
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 5;
/// 健康检查间隔缺省值（秒）
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 6;
/// 连续不健康后自动注销的时限缺省值（秒）
pub const DEFAULT_DEREGISTER_AFTER_SECS: u64 = 1800;
/// 注册中心地址缺省值
pub const DEFAULT_CONSUL_ADDRESS: &str = "127.0.0.1:8500";

/// 服务器角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    Http,
    Grpc,
}

impl ServerRole {
    /// 注册服务名后缀
    pub fn suffix(&self) -> &'static str {
        match self {
            ServerRole::Http => ".http",
            ServerRole::Grpc => ".grpc",
        }
    }

    /// 注册标签里的协议名
    pub fn protocol(&self) -> &'static str {
        match self {
            ServerRole::Http => "http",
            ServerRole::Grpc => "grpc",
        }
    }
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.protocol())
    }
}

/// 服务配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConf {
    /// 服务名，为空时跳过注册
    pub name: String,
    pub http_host: String,
    pub http_port: u16,
    /// HTTP 连接的 TCP keep-alive 周期（秒），缺省见 listener 模块
    pub http_keepalive_secs: Option<u64>,
    pub grpc_host: String,
    pub grpc_port: u16,
    /// gRPC 服务端 HTTP/2 keep-alive 周期（秒），不设置则关闭
    pub grpc_keepalive_secs: Option<u64>,
    /// 注册中心地址，`-` 或 `0.0.0.0` 表示禁用
    pub consul_address: String,
    pub check_timeout_secs: u64,
    pub check_interval_secs: u64,
    pub deregister_after_secs: u64,
}

impl Default for ServiceConf {
    fn default() -> Self {
        Self {
            name: String::new(),
            http_host: String::new(),
            http_port: 0,
            http_keepalive_secs: None,
            grpc_host: String::new(),
            grpc_port: 0,
            grpc_keepalive_secs: None,
            consul_address: String::new(),
            check_timeout_secs: 0,
            check_interval_secs: 0,
            deregister_after_secs: 0,
        }
    }
}

impl ServiceConf {
    /// 从 TOML 文件加载配置并填充缺省值
    pub fn load_from_file(path: &str) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::CoreError::config(format!("read {}: {}", path, e)))?;
        let mut conf: ServiceConf = toml::from_str(&content)
            .map_err(|e| crate::error::CoreError::config(format!("parse {}: {}", path, e)))?;
        conf.merge_defaults();
        Ok(conf)
    }

    /// 填充缺省值
    ///
    /// 通告地址为空时取本机内网地址；检查周期取 5s/6s/30min 的兼容缺省值。
    pub fn merge_defaults(&mut self) {
        if self.consul_address.is_empty() {
            self.consul_address = DEFAULT_CONSUL_ADDRESS.to_string();
        }
        if self.check_timeout_secs == 0 {
            self.check_timeout_secs = DEFAULT_CHECK_TIMEOUT_SECS;
        }
        if self.check_interval_secs == 0 {
            self.check_interval_secs = DEFAULT_CHECK_INTERVAL_SECS;
        }
        if self.deregister_after_secs == 0 {
            self.deregister_after_secs = DEFAULT_DEREGISTER_AFTER_SECS;
        }
        if self.http_port != 0 && self.http_host.is_empty() {
            self.http_host = crate::utils::private_address();
        }
        if self.grpc_port != 0 && self.grpc_host.is_empty() {
            self.grpc_host = crate::utils::private_address();
        }
    }

    /// 指定角色的配置投影，角色关闭时返回 `None`
    pub fn role(&self, role: ServerRole) -> Option<RoleConf> {
        match role {
            ServerRole::Http if self.http_port != 0 => Some(RoleConf {
                role,
                host: self.http_host.clone(),
                port: self.http_port,
                keepalive: self.http_keepalive_secs.map(Duration::from_secs),
            }),
            ServerRole::Grpc if self.grpc_port != 0 => Some(RoleConf {
                role,
                host: self.grpc_host.clone(),
                port: self.grpc_port,
                keepalive: self.grpc_keepalive_secs.map(Duration::from_secs),
            }),
            _ => None,
        }
    }

    /// HTTP 角色的注册服务名（`{name}.http`）
    pub fn http_name(&self) -> String {
        format!("{}{}", self.name, ServerRole::Http.suffix())
    }

    /// gRPC 角色的注册服务名（`{name}.grpc`）
    pub fn grpc_name(&self) -> String {
        format!("{}{}", self.name, ServerRole::Grpc.suffix())
    }

    /// 注册中心是否启用
    pub fn registry_enabled(&self) -> bool {
        !self.name.is_empty() && !matches!(self.consul_address.as_str(), "-" | "0.0.0.0")
    }
}

/// 单个服务器角色的监听与注册参数
#[derive(Debug, Clone)]
pub struct RoleConf {
    pub role: ServerRole,
    pub host: String,
    pub port: u16,
    pub keepalive: Option<Duration>,
}

impl RoleConf {
    /// `host:port` 形式的地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 该角色的注册服务名
    pub fn service_name(&self, base: &str) -> String {
        format!("{}{}", base, self.role.suffix())
    }
}
