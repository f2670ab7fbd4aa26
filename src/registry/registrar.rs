//! 实例注册器
//!
//! 启动时为每个启用的角色构造注册记录并尽力注册，
//! 退出时注销所有构造过的记录，无论注册当时是否成功。

use crate::config::{ServerRole, ServiceConf};
use crate::health::HEALTH_PATH;
use crate::registry::backend::{CheckTarget, HealthCheck, RegistryBackend, ServiceRecord};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 实例注册器
pub struct InstanceRegistrar {
    backend: Arc<dyn RegistryBackend>,
    registered: Vec<String>,
}

impl InstanceRegistrar {
    pub fn new(backend: Arc<dyn RegistryBackend>) -> Self {
        Self {
            backend,
            registered: Vec::new(),
        }
    }

    /// 为所有启用的角色注册服务记录（尽力而为）
    ///
    /// 单条记录失败只记录日志，不影响其余记录的注册。
    pub async fn register_all(&mut self, conf: &ServiceConf) {
        if conf.name.is_empty() {
            debug!("service name is empty, skipping registration");
            return;
        }

        for record in build_records(conf) {
            // 先记账再注册，失败的记录退出时同样要注销
            self.registered.push(record.id.clone());
            match self.backend.register(&record).await {
                Ok(()) => info!(
                    service_id = %record.id,
                    service_name = %record.name,
                    address = %record.address,
                    port = record.port,
                    "✅ Service registered"
                ),
                Err(e) => warn!(
                    service_id = %record.id,
                    error = %e,
                    "⚠️ Service registration failed"
                ),
            }
        }
    }

    /// 注销所有登记过的记录，重复调用是空操作
    pub async fn deregister_all(&mut self) {
        for id in std::mem::take(&mut self.registered) {
            match self.backend.deregister(&id).await {
                Ok(()) => info!(service_id = %id, "Service deregistered"),
                Err(e) => warn!(
                    service_id = %id,
                    error = %e,
                    "⚠️ Service deregistration failed"
                ),
            }
        }
    }

    /// 当前登记在册的记录 ID
    pub fn registered_ids(&self) -> &[String] {
        &self.registered
    }
}

/// 按角色构造注册记录
///
/// HTTP 角色产出两条：带 `.http` 后缀的新名字和兼容老调用方的裸名字，
/// 指向同一地址、同一健康检查；gRPC 角色产出一条带 `.grpc` 后缀的记录，
/// 用标准 grpc.health.v1 检查。
pub(crate) fn build_records(conf: &ServiceConf) -> Vec<ServiceRecord> {
    let mut records = Vec::new();

    if let Some(http) = conf.role(ServerRole::Http) {
        let check = HealthCheck {
            target: CheckTarget::Http(format!("http://{}{}", http.addr(), HEALTH_PATH)),
            timeout_secs: conf.check_timeout_secs,
            interval_secs: conf.check_interval_secs,
            deregister_after_secs: conf.deregister_after_secs,
        };
        let suffixed = conf.http_name();
        records.push(ServiceRecord {
            id: format!("{}@{}", suffixed, http.addr()),
            name: suffixed.clone(),
            role: ServerRole::Http,
            address: http.host.clone(),
            port: http.port,
            tags: vec![
                ServerRole::Http.protocol().to_string(),
                conf.name.clone(),
                suffixed.clone(),
            ],
            check: check.clone(),
        });
        records.push(ServiceRecord {
            id: format!("{}@{}", conf.name, http.addr()),
            name: conf.name.clone(),
            role: ServerRole::Http,
            address: http.host.clone(),
            port: http.port,
            tags: vec![ServerRole::Http.protocol().to_string(), conf.name.clone()],
            check,
        });
    }

    if let Some(grpc) = conf.role(ServerRole::Grpc) {
        let grpc_name = conf.grpc_name();
        records.push(ServiceRecord {
            id: format!("{}@{}", grpc_name, grpc.addr()),
            name: grpc_name.clone(),
            role: ServerRole::Grpc,
            address: grpc.host.clone(),
            port: grpc.port,
            tags: vec![
                ServerRole::Grpc.protocol().to_string(),
                conf.name.clone(),
                grpc_name,
            ],
            check: HealthCheck {
                target: CheckTarget::Grpc(grpc.addr()),
                timeout_secs: conf.check_timeout_secs,
                interval_secs: conf.check_interval_secs,
                deregister_after_secs: conf.deregister_after_secs,
            },
        });
    }

    records
}
