//! 测试共用的内存注册中心

use async_trait::async_trait;
use beacon_server_core::error::Result;
use beacon_server_core::registry::{RegistryBackend, ServiceEndpoint, ServiceRecord};
use beacon_server_core::CoreError;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::Notify;

/// 内存注册中心
///
/// 查询带与真实后端一致的阻塞语义：版本号不超过 `last_index` 时挂起，
/// 直到有变更推进版本号。
#[derive(Default)]
pub struct FakeRegistry {
    state: Mutex<FakeState>,
    changed: Notify,
}

#[derive(Default)]
struct FakeState {
    records: Vec<ServiceRecord>,
    deregistered: Vec<String>,
    endpoints: HashMap<String, Vec<ServiceEndpoint>>,
    index: u64,
    fail_register: bool,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置一个服务的实例列表并推进版本号
    pub fn set_endpoints(&self, service: &str, endpoints: Vec<(&str, &str, u16)>) {
        let mut state = self.state.lock().unwrap();
        state.endpoints.insert(
            service.to_string(),
            endpoints
                .into_iter()
                .map(|(id, address, port)| ServiceEndpoint {
                    id: id.to_string(),
                    address: address.to_string(),
                    port,
                })
                .collect(),
        );
        state.index += 1;
        drop(state);
        self.changed.notify_waiters();
    }

    /// 只推进版本号、不改成员，模拟注册中心里无关服务的变更
    pub fn bump_index(&self) {
        let mut state = self.state.lock().unwrap();
        state.index += 1;
        drop(state);
        self.changed.notify_waiters();
    }

    /// 让后续注册调用失败
    pub fn fail_register(&self, fail: bool) {
        self.state.lock().unwrap().fail_register = fail;
    }

    /// 当前在册的记录 ID
    pub fn registered_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .records
            .iter()
            .map(|r| r.id.clone())
            .collect()
    }

    /// 收到过的注销调用（含重复）
    pub fn deregistered_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().deregistered.clone()
    }

    /// 在册记录的完整内容
    pub fn records(&self) -> Vec<ServiceRecord> {
        self.state.lock().unwrap().records.clone()
    }
}

#[async_trait]
impl RegistryBackend for FakeRegistry {
    async fn register(&self, record: &ServiceRecord) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_register {
            return Err(CoreError::registration(&record.id, "injected failure"));
        }
        state.records.retain(|r| r.id != record.id);
        state.records.push(record.clone());
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.records.retain(|r| r.id != service_id);
        state.deregistered.push(service_id.to_string());
        Ok(())
    }

    async fn query(
        &self,
        service: &str,
        _tags: &[String],
        last_index: u64,
    ) -> Result<(Vec<ServiceEndpoint>, u64)> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.state.lock().unwrap();
                if state.index > last_index {
                    let endpoints = state.endpoints.get(service).cloned().unwrap_or_default();
                    return Ok((endpoints, state.index));
                }
            }
            notified.await;
        }
    }
}
