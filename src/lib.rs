//! Beacon Server Core Library
//!
//! Dual-protocol (HTTP + gRPC) serving for one process: Consul registration
//! with health checks, discovery-backed client load balancing, and
//! zero-downtime restart via listener handoff.

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod health;
pub mod registry;
pub mod server;
pub mod utils;

// Re-exports
pub use client::ServiceClient;
pub use config::{RoleConf, ServerRole, ServiceConf};
pub use discovery::{ConnectionPool, DiscoveryWatcher, MembershipEvent};
pub use error::{CoreError, Result};
pub use health::{HEALTH_PATH, grpc_health_service, health_router};
pub use registry::{
    CheckTarget, ConsulRegistry, HealthCheck, InstanceRegistrar, RegistryBackend, ServiceEndpoint,
    ServiceRecord,
};
pub use server::{LifecycleState, Server, ServerBuilder};
pub use utils::{init_tracing, private_address, wait_for_server_ready};
