//! 服务发现模块
//!
//! 基于注册中心阻塞查询的成员监视，加轮询连接池。

pub mod pool;
pub mod watcher;

pub use pool::ConnectionPool;
pub use watcher::{DiscoveryWatcher, MembershipEvent};
