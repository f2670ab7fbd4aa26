//! 注册中心后端抽象
//!
//! `RegistryBackend` 是注册、注销与阻塞查询的统一接口，
//! 由显式构造的实例注入到注册器与服务发现组件。

use crate::config::ServerRole;
use crate::error::Result;
use async_trait::async_trait;

/// 健康检查目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckTarget {
    /// HTTP GET 探测的完整 URL
    Http(String),
    /// 标准 grpc.health.v1 探测的 `host:port`
    Grpc(String),
}

/// 健康检查描述
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub target: CheckTarget,
    pub timeout_secs: u64,
    pub interval_secs: u64,
    /// 持续不健康超过该时限后由注册中心自动注销
    pub deregister_after_secs: u64,
}

/// 一条服务注册记录
///
/// `id` 形如 `{服务名}@{host}:{port}`。同一个 HTTP 实例会以带后缀名
/// 和兼容裸名各注册一条记录，两条记录指向同一地址。
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub id: String,
    pub name: String,
    pub role: ServerRole,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
    pub check: HealthCheck,
}

/// 查询返回的服务实例
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub id: String,
    pub address: String,
    pub port: u16,
}

impl ServiceEndpoint {
    /// `host:port` 形式的地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// 注册中心后端接口
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// 注册一条服务记录
    async fn register(&self, record: &ServiceRecord) -> Result<()>;

    /// 按记录 ID 注销，注销不存在的记录视为成功
    async fn deregister(&self, service_id: &str) -> Result<()>;

    /// 阻塞查询指定服务的健康实例集
    ///
    /// 阻塞直到注册中心版本号超过 `last_index` 或服务端等待超时，
    /// 返回实例列表和新的版本号。版本号单调不减。
    async fn query(
        &self,
        service: &str,
        tags: &[String],
        last_index: u64,
    ) -> Result<(Vec<ServiceEndpoint>, u64)>;
}
