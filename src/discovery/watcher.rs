//! 服务发现监视器
//!
//! 基于注册中心阻塞查询的成员监视：每次查询携带上一轮的版本号，
//! 返回后与已知地址集做差集，只有成员真正变化时才产出事件。

use crate::error::Result;
use crate::registry::backend::RegistryBackend;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// 查询失败后的固定重试间隔
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// 成员变更事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Add(String),
    Remove(String),
}

impl MembershipEvent {
    /// 事件携带的 `host:port` 地址
    pub fn address(&self) -> &str {
        match self {
            MembershipEvent::Add(addr) | MembershipEvent::Remove(addr) => addr,
        }
    }
}

/// 服务发现监视器
pub struct DiscoveryWatcher {
    backend: Arc<dyn RegistryBackend>,
    service: String,
    tags: Vec<String>,
    addresses: HashSet<String>,
    last_index: u64,
}

impl DiscoveryWatcher {
    pub fn new(backend: Arc<dyn RegistryBackend>, service: impl Into<String>) -> Self {
        Self {
            backend,
            service: service.into(),
            tags: Vec::new(),
            addresses: HashSet::new(),
            last_index: 0,
        }
    }

    /// 限定查询标签
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// 监视的服务名
    pub fn service(&self) -> &str {
        &self.service
    }

    /// 当前已知的地址集
    pub fn addresses(&self) -> &HashSet<String> {
        &self.addresses
    }

    /// 阻塞等待下一批成员变更
    ///
    /// 内部循环：查询出错按固定间隔重试，永不向调用方返回终止错误；
    /// 成员未变化（只有版本号前进）时继续下一轮查询。
    /// 版本号在每次成功查询后更新。
    pub async fn next(&mut self) -> Result<Vec<MembershipEvent>> {
        loop {
            let (endpoints, index) = match self
                .backend
                .query(&self.service, &self.tags, self.last_index)
                .await
            {
                Ok(result) => result,
                Err(e) => {
                    warn!(
                        service_name = %self.service,
                        error = %e,
                        "Discovery query failed, retrying"
                    );
                    sleep(RETRY_DELAY).await;
                    continue;
                }
            };
            self.last_index = index;

            let fresh: HashSet<String> = endpoints.iter().map(|ep| ep.addr()).collect();
            let events = diff_addresses(&self.addresses, &fresh);
            if events.is_empty() {
                continue;
            }

            debug!(
                service_name = %self.service,
                events = events.len(),
                index = index,
                "Membership changed"
            );
            self.addresses = fresh;
            return Ok(events);
        }
    }
}

/// 新旧地址集做差，先产出下线事件再产出上线事件
pub(crate) fn diff_addresses(
    old: &HashSet<String>,
    fresh: &HashSet<String>,
) -> Vec<MembershipEvent> {
    let mut events: Vec<MembershipEvent> = old
        .difference(fresh)
        .cloned()
        .map(MembershipEvent::Remove)
        .collect();
    events.extend(fresh.difference(old).cloned().map(MembershipEvent::Add));
    events
}
