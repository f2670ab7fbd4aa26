//! 服务器生命周期集成测试
//!
//! 单个测试跑完整条链路：启动双协议服务器、注册、两类健康检查、
//! SIGTERM 排空退出、注销、端口释放。信号发给整个进程，
//! 所以这个文件只放这一个测试。

#![cfg(unix)]

mod common;

use beacon_server_core::{ServerBuilder, ServiceConf};
use common::FakeRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;

fn free_ports() -> (u16, u16) {
    let probe1 = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    let probe2 = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    let port1 = probe1.local_addr().expect("probe addr").port();
    let port2 = probe2.local_addr().expect("probe addr").port();
    (port1, port2)
}

fn slow_routes() -> axum::Router {
    use axum::routing::get;
    axum::Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            "done"
        }),
    )
}

/// 测试：SIGTERM 排空存量请求、注销全部记录并释放端口
#[tokio::test(flavor = "multi_thread")]
async fn sigterm_drains_deregisters_and_releases_ports() {
    // 预先装上 SIGTERM 处理器，测试进程不会被默认动作杀掉
    let _sigterm = signal(SignalKind::terminate()).expect("install sigterm handler");

    let (http_port, grpc_port) = free_ports();
    let conf = ServiceConf {
        name: "lifecycle".to_string(),
        http_host: "127.0.0.1".to_string(),
        http_port,
        grpc_host: "127.0.0.1".to_string(),
        grpc_port,
        ..ServiceConf::default()
    };

    let registry = Arc::new(FakeRegistry::new());
    let server = ServerBuilder::new(conf)
        .routes(slow_routes())
        .registry(registry.clone())
        .drain_timeout(Duration::from_secs(10))
        .build();

    let serve_handle = tokio::spawn(server.serve());

    // 注册发生在监听器就绪探测之后，等它完成
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while registry.registered_ids().len() < 3 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "registration did not happen, ids: {:?}",
            registry.registered_ids()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let expected_ids = vec![
        format!("lifecycle.http@127.0.0.1:{http_port}"),
        format!("lifecycle@127.0.0.1:{http_port}"),
        format!("lifecycle.grpc@127.0.0.1:{grpc_port}"),
    ];
    assert_eq!(registry.registered_ids(), expected_ids);

    // HTTP 健康检查
    let body = reqwest::get(format!("http://127.0.0.1:{http_port}/health"))
        .await
        .expect("health request failed")
        .text()
        .await
        .expect("health body");
    assert_eq!(body, "OK");

    // gRPC 标准健康检查
    let channel = tonic::transport::Endpoint::from_shared(format!("http://127.0.0.1:{grpc_port}"))
        .expect("endpoint")
        .connect()
        .await
        .expect("grpc connect failed");
    let mut health = HealthClient::new(channel);
    let status = health
        .check(HealthCheckRequest {
            service: String::new(),
        })
        .await
        .expect("health check failed")
        .into_inner()
        .status;
    assert_eq!(status, ServingStatus::Serving as i32);
    drop(health);

    // 先压入一个慢请求，再触发终止信号
    let slow_url = format!("http://127.0.0.1:{http_port}/slow");
    let in_flight = tokio::spawn(async move {
        reqwest::get(slow_url)
            .await
            .expect("slow request failed")
            .text()
            .await
            .expect("slow body")
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    // 反复补发，覆盖服务器端处理器尚未就位的窗口
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !serve_handle.is_finished() {
        unsafe { libc::raise(libc::SIGTERM) };
        assert!(
            tokio::time::Instant::now() < deadline,
            "server did not stop on SIGTERM"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // 排空期内的存量请求要跑完
    assert_eq!(in_flight.await.expect("in-flight join"), "done");
    serve_handle
        .await
        .expect("serve join")
        .expect("serve failed");

    // 三条记录全部注销
    let deregistered = registry.deregistered_ids();
    for id in &expected_ids {
        assert!(deregistered.contains(id), "{id} was not deregistered");
    }

    // 端口已全部释放
    assert!(
        tokio::net::TcpStream::connect(("127.0.0.1", http_port))
            .await
            .is_err()
    );
    assert!(
        tokio::net::TcpStream::connect(("127.0.0.1", grpc_port))
            .await
            .is_err()
    );
}
