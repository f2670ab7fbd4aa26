//! 服务客户端模块
//!
//! `ServiceClient` 把发现监视器和连接池组合起来：后台任务持续
//! 拉取成员变更并应用到池，调用方通过 `channel()` 轮询取连接。

use crate::discovery::{ConnectionPool, DiscoveryWatcher};
use crate::error::Result;
use crate::registry::backend::RegistryBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tonic::transport::Channel;
use tracing::{debug, warn};

/// 面向单个逻辑服务的发现客户端
///
/// 需要在 tokio 运行时内创建；析构时停止后台监视任务。
pub struct ServiceClient {
    service: String,
    pool: Arc<ConnectionPool>,
    watch_task: JoinHandle<()>,
}

impl ServiceClient {
    /// 创建客户端并启动后台监视任务
    pub fn new(backend: Arc<dyn RegistryBackend>, service: impl Into<String>) -> Self {
        Self::with_tags(backend, service, Vec::new())
    }

    /// 创建客户端，限定查询标签
    pub fn with_tags(
        backend: Arc<dyn RegistryBackend>,
        service: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        let service = service.into();
        let pool = Arc::new(ConnectionPool::new(service.clone()));

        let mut watcher = DiscoveryWatcher::new(backend, service.clone()).with_tags(tags);
        let watch_pool = pool.clone();
        let watch_service = service.clone();
        let watch_task = tokio::spawn(async move {
            loop {
                match watcher.next().await {
                    Ok(events) => {
                        debug!(
                            service_name = %watch_service,
                            events = events.len(),
                            "Applying membership events"
                        );
                        watch_pool.apply(&events);
                    }
                    Err(e) => {
                        warn!(
                            service_name = %watch_service,
                            error = %e,
                            "Discovery watch error"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            service,
            pool,
            watch_task,
        }
    }

    /// 轮询取一个服务连接
    pub fn channel(&self) -> Result<Channel> {
        self.pool.pick()
    }

    /// 目标服务名
    pub fn service(&self) -> &str {
        &self.service
    }

    /// 当前已发现的实例地址
    pub fn addresses(&self) -> Vec<String> {
        self.pool.addresses()
    }
}

impl Drop for ServiceClient {
    fn drop(&mut self) {
        self.watch_task.abort();
    }
}
