//! 连接池与轮询负载均衡
//!
//! 面向单个逻辑服务的出站 gRPC 连接池。成员变更事件由
//! `DiscoveryWatcher` 产出、由本池消费；选取是纯轮询。

use crate::discovery::watcher::MembershipEvent;
use crate::error::{CoreError, Result};
use std::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};

struct PoolEntry {
    address: String,
    channel: Channel,
}

#[derive(Default)]
struct PoolState {
    entries: Vec<PoolEntry>,
    cursor: usize,
}

/// 出站连接池
///
/// `apply` 与 `pick` 由同一把锁串行化。池不感知连接健康，
/// 失败调用的重试由调用方负责。
pub struct ConnectionPool {
    service: String,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            state: Mutex::new(PoolState::default()),
        }
    }

    /// 轮询选出一个连接，池为空时返回 `NoAvailableInstance`
    pub fn pick(&self) -> Result<Channel> {
        self.pick_entry().map(|(_, channel)| channel)
    }

    fn pick_entry(&self) -> Result<(String, Channel)> {
        let mut state = self.state.lock().expect("connection pool lock poisoned");
        if state.entries.is_empty() {
            return Err(CoreError::NoAvailableInstance(self.service.clone()));
        }

        let index = state.cursor % state.entries.len();
        let entry = &state.entries[index];
        let picked = (entry.address.clone(), entry.channel.clone());
        state.cursor = (index + 1) % state.entries.len();
        Ok(picked)
    }

    /// 应用一批成员变更事件
    ///
    /// 上线地址以懒连接方式入池（首次调用才建链），下线地址移除并
    /// 丢弃池内引用；无法解析的地址跳过并记录日志。游标在移除后收敛
    /// 到有效范围。
    pub fn apply(&self, events: &[MembershipEvent]) {
        let mut state = self.state.lock().expect("connection pool lock poisoned");
        for event in events {
            match event {
                MembershipEvent::Add(addr) => match dial_lazy(addr) {
                    Ok(channel) => {
                        debug!(service_name = %self.service, address = %addr, "Pool add");
                        state.entries.push(PoolEntry {
                            address: addr.clone(),
                            channel,
                        });
                    }
                    Err(e) => {
                        warn!(
                            service_name = %self.service,
                            address = %addr,
                            error = %e,
                            "Invalid instance address, skipped"
                        );
                    }
                },
                MembershipEvent::Remove(addr) => {
                    if let Some(pos) = state.entries.iter().position(|e| e.address == *addr) {
                        state.entries.remove(pos);
                        debug!(service_name = %self.service, address = %addr, "Pool remove");
                    }
                }
            }
        }
        if state.cursor >= state.entries.len() {
            state.cursor = 0;
        }
    }

    /// 当前池内地址（按加入顺序）
    pub fn addresses(&self) -> Vec<String> {
        let state = self.state.lock().expect("connection pool lock poisoned");
        state.entries.iter().map(|e| e.address.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("connection pool lock poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn dial_lazy(addr: &str) -> std::result::Result<Channel, tonic::transport::Error> {
    Ok(Endpoint::from_shared(format!("http://{}", addr))?.connect_lazy())
}
