//! Consul 后端集成测试
//!
//! 这些测试需要运行中的 Consul agent，默认被忽略，
//! 用 `cargo test --test consul_registry_test -- --ignored` 运行。
//!
//! 启动 Consul（健康检查要能回连本机，容器需要 host 网络）：
//! ```bash
//! docker run -d --name consul-test --network host hashicorp/consul:1.18 agent -dev
//!
//! # 或者使用本地安装的 consul
//! consul agent -dev
//! ```

use beacon_server_core::registry::{
    CheckTarget, ConsulRegistry, HealthCheck, RegistryBackend, ServiceRecord,
};
use beacon_server_core::{ServerRole, health};
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Consul 地址，可用环境变量 CONSUL_HTTP_ADDR 覆盖
fn consul_address() -> String {
    std::env::var("CONSUL_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8500".to_string())
}

/// 起一个本地 `/health` 服务器，给 Consul 健康检查回连
async fn spawn_health_server() -> (u16, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind health server");
    let port = listener.local_addr().expect("health addr").port();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, health::health_router()).await;
    });
    (port, handle)
}

fn test_record(service: &str, port: u16, check_port: u16) -> ServiceRecord {
    ServiceRecord {
        id: format!("{}@127.0.0.1:{}", service, port),
        name: service.to_string(),
        role: ServerRole::Http,
        address: "127.0.0.1".to_string(),
        port,
        tags: vec!["http".to_string(), service.to_string()],
        check: HealthCheck {
            target: CheckTarget::Http(format!("http://127.0.0.1:{}/health", check_port)),
            timeout_secs: 2,
            interval_secs: 1,
            deregister_after_secs: 60,
        },
    }
}

/// 等实例通过健康检查后出现在查询结果里，返回当时的版本号
async fn wait_until_passing(backend: &ConsulRegistry, service: &str, id: &str) -> u64 {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let (endpoints, index) = backend.query(service, &[], 0).await.expect("query failed");
        if endpoints.iter().any(|e| e.id == id) {
            return index;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "instance {id} never became passing"
        );
        sleep(Duration::from_millis(500)).await;
    }
}

/// 测试：注册、查询、注销全链路
#[tokio::test]
#[ignore]
async fn test_consul_register_query_deregister() {
    let backend = ConsulRegistry::new(consul_address());
    let (check_port, health_server) = spawn_health_server().await;

    let record = test_record("beacon-test.http", 9001, check_port);
    backend.register(&record).await.expect("register failed");

    wait_until_passing(&backend, "beacon-test.http", &record.id).await;

    // 带标签过滤也要能查到
    let (tagged, _) = backend
        .query("beacon-test.http", &["http".to_string()], 0)
        .await
        .expect("tagged query failed");
    let found = tagged
        .iter()
        .find(|e| e.id == record.id)
        .expect("instance missing from tagged query");
    assert_eq!(found.addr(), "127.0.0.1:9001");

    // 清理并确认消失
    backend
        .deregister(&record.id)
        .await
        .expect("deregister failed");
    sleep(Duration::from_millis(500)).await;
    let (after, _) = backend
        .query("beacon-test.http", &[], 0)
        .await
        .expect("query after deregister failed");
    assert!(!after.iter().any(|e| e.id == record.id));

    health_server.abort();
}

/// 测试：注销不存在的 ID 是空操作
#[tokio::test]
#[ignore]
async fn test_consul_deregister_unknown_is_noop() {
    let backend = ConsulRegistry::new(consul_address());
    backend
        .deregister("beacon-missing@127.0.0.1:1")
        .await
        .expect("deregister of unknown id should succeed");
}

/// 测试：阻塞查询在成员变化时返回
#[tokio::test]
#[ignore]
async fn test_consul_blocking_query_sees_new_instance() {
    let backend = ConsulRegistry::new(consul_address());
    let (check_port, health_server) = spawn_health_server().await;

    let first = test_record("beacon-blocking.http", 9101, check_port);
    backend.register(&first).await.expect("register first failed");
    let mut index = wait_until_passing(&backend, "beacon-blocking.http", &first.id).await;

    let second = test_record("beacon-blocking.http", 9102, check_port);
    backend
        .register(&second)
        .await
        .expect("register second failed");

    // 逐轮阻塞查询，直到新实例通过检查并出现
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let (endpoints, next) = timeout(
            Duration::from_secs(10),
            backend.query("beacon-blocking.http", &[], index),
        )
        .await
        .expect("blocking query timed out")
        .expect("blocking query failed");
        index = next;
        if endpoints.iter().any(|e| e.id == second.id) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "second instance never appeared"
        );
    }

    backend
        .deregister(&first.id)
        .await
        .expect("deregister first");
    backend
        .deregister(&second.id)
        .await
        .expect("deregister second");
    health_server.abort();
}
