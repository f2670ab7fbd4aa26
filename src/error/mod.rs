//! 统一错误类型
//!
//! 核心库的错误分类：注册中心传输错误可重试，监听器错误致命，
//! 注册/注销错误尽力而为（只记录日志，不中断服务）。

use crate::config::ServerRole;
use thiserror::Error;

/// 核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    /// 注册中心网络错误（调用方负责重试）
    #[error("registry transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 单条服务记录注册失败（不影响其他记录）
    #[error("registration failed for {id}: {reason}")]
    Registration { id: String, reason: String },

    /// 监听器绑定或继承失败（致命，中止启动）
    #[error("{role} listener error: {source}")]
    Listen {
        role: ServerRole,
        source: std::io::Error,
    },

    /// 接班进程拉起失败（进程保持运行）
    #[error("successor spawn failed: {0}")]
    Spawn(#[source] std::io::Error),

    /// 连接池中没有可用实例
    #[error("no available instance for service {0}")]
    NoAvailableInstance(String),

    /// 服务器运行期故障
    #[error("{role} server error: {reason}")]
    Serve { role: ServerRole, reason: String },

    /// 配置错误
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CoreError {
    /// 创建注册失败错误
    pub fn registration(id: impl Into<String>, reason: impl Into<String>) -> Self {
        CoreError::Registration {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// 创建监听器错误
    pub fn listen(role: ServerRole, source: std::io::Error) -> Self {
        CoreError::Listen { role, source }
    }

    /// 创建服务器运行期错误
    pub fn serve(role: ServerRole, reason: impl Into<String>) -> Self {
        CoreError::Serve {
            role,
            reason: reason.into(),
        }
    }

    /// 创建配置错误
    pub fn config(msg: impl Into<String>) -> Self {
        CoreError::Config(msg.into())
    }
}

/// 核心库 Result 别名
pub type Result<T> = std::result::Result<T, CoreError>;
