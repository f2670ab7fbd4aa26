//! 服务注册模块
//!
//! 注册中心后端接口、Consul 实现和实例注册器。

pub mod backend;
pub mod consul;
pub mod registrar;

pub use backend::{CheckTarget, HealthCheck, RegistryBackend, ServiceEndpoint, ServiceRecord};
pub use consul::ConsulRegistry;
pub use registrar::InstanceRegistrar;
