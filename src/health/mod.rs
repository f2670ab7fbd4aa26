//! 健康检查模块
//!
//! 提供注册中心健康检查所依赖的两个端点：HTTP `/health` 路由
//! 和 gRPC 标准健康服务（grpc.health.v1.Health）。

use axum::routing::get;
use axum::Router;
use tonic_health::pb::health_server::{Health, HealthServer};

/// HTTP 健康检查路径，注册服务时写入检查地址
pub const HEALTH_PATH: &str = "/health";

/// 构建 HTTP 健康检查路由
///
/// 进程存活即返回 200 "OK"，不做业务级探测。
pub fn health_router() -> Router {
    Router::new().route(HEALTH_PATH, get(health_handler))
}

async fn health_handler() -> &'static str {
    "OK"
}

/// 构建 gRPC 健康检查服务
///
/// 默认服务名（空字符串）恒为 SERVING，检查方按整进程探活。
pub fn grpc_health_service() -> HealthServer<impl Health> {
    let (_reporter, service) = tonic_health::server::health_reporter();
    service
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_route_returns_ok() {
        let router = health_router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri(HEALTH_PATH)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"OK");
    }
}
