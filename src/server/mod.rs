//! 服务器模块
//!
//! `ServerBuilder` 组装 HTTP（axum）和 gRPC（tonic）两个角色，
//! `Server::serve` 跑完整生命周期：取得监听器（新建或继承）、
//! 并行启动两个服务器、注册到注册中心、等待信号、排空退场。
//! 只要发生过注册，任何退出路径都保证注销。

mod listener;
mod shutdown;

pub use shutdown::LifecycleState;

use crate::config::{ServerRole, ServiceConf};
use crate::error::{CoreError, Result};
use crate::health;
use crate::registry::{ConsulRegistry, InstanceRegistrar, RegistryBackend};
use listener::{DEFAULT_HTTP_KEEPALIVE, InheritancePlan, KeepAliveListener, ListenerHandle};
use shutdown::ShutdownCoordinator;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_stream::wrappers::TcpListenerStream;
use tracing::{error, info, warn};

/// gRPC 路由的累积状态
///
/// tonic 的 `Server` 在挂第一个服务时变成 `Router`，用枚举把
/// 两个阶段装在同一个字段里。
enum GrpcRouter {
    Pending(tonic::transport::Server),
    Routed(tonic::transport::server::Router),
}

impl GrpcRouter {
    fn add_service<S>(self, svc: S) -> Self
    where
        S: tower::Service<
                http::Request<tonic::body::Body>,
                Response = http::Response<tonic::body::Body>,
                Error = Infallible,
            > + tonic::server::NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        match self {
            GrpcRouter::Pending(mut server) => GrpcRouter::Routed(server.add_service(svc)),
            GrpcRouter::Routed(router) => GrpcRouter::Routed(router.add_service(svc)),
        }
    }
}

/// 服务器构建器
pub struct ServerBuilder {
    conf: ServiceConf,
    http_routes: Vec<axum::Router>,
    grpc: GrpcRouter,
    registry: Option<Arc<dyn RegistryBackend>>,
    drain_timeout: Option<Duration>,
}

impl ServerBuilder {
    /// 从配置创建构建器，缺省值在这里补齐
    pub fn new(mut conf: ServiceConf) -> Self {
        conf.merge_defaults();
        let mut grpc_server = tonic::transport::Server::builder();
        if let Some(secs) = conf.grpc_keepalive_secs {
            grpc_server =
                grpc_server.http2_keepalive_interval(Some(Duration::from_secs(secs)));
        }
        Self {
            conf,
            http_routes: Vec::new(),
            grpc: GrpcRouter::Pending(grpc_server),
            registry: None,
            drain_timeout: None,
        }
    }

    /// 从 TOML 配置文件创建构建器
    pub fn from_file(path: &str) -> Result<Self> {
        Ok(Self::new(ServiceConf::load_from_file(path)?))
    }

    /// 挂载一组 HTTP 路由
    pub fn routes(mut self, router: axum::Router) -> Self {
        self.http_routes.push(router);
        self
    }

    /// 挂载一个 gRPC 服务
    pub fn grpc_service<S>(mut self, svc: S) -> Self
    where
        S: tower::Service<
                http::Request<tonic::body::Body>,
                Response = http::Response<tonic::body::Body>,
                Error = Infallible,
            > + tonic::server::NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.grpc = self.grpc.add_service(svc);
        self
    }

    /// 注入自定义注册中心后端
    ///
    /// 不注入时按配置地址构造 Consul 后端。
    pub fn registry(mut self, backend: Arc<dyn RegistryBackend>) -> Self {
        self.registry = Some(backend);
        self
    }

    /// 排空等待上限，不设置则一直等到存量请求全部完成
    pub fn drain_timeout(mut self, limit: Duration) -> Self {
        self.drain_timeout = Some(limit);
        self
    }

    /// 组装出可运行的服务器
    ///
    /// 健康检查端点在这里挂入：HTTP 的 `/health` 路由和
    /// gRPC 的标准健康服务。
    pub fn build(self) -> Server {
        let ServerBuilder {
            conf,
            http_routes,
            grpc,
            registry,
            drain_timeout,
        } = self;

        let mut http_router = health::health_router();
        for routes in http_routes {
            http_router = http_router.merge(routes);
        }

        let grpc_router = match grpc {
            GrpcRouter::Pending(mut server) => server.add_service(health::grpc_health_service()),
            GrpcRouter::Routed(router) => router.add_service(health::grpc_health_service()),
        };

        let registry = registry.or_else(|| {
            conf.registry_enabled().then(|| {
                Arc::new(ConsulRegistry::new(&conf.consul_address)) as Arc<dyn RegistryBackend>
            })
        });

        Server {
            conf,
            http_router,
            grpc_router,
            registry,
            drain_timeout,
        }
    }
}

/// 组装完成的双协议服务器
pub struct Server {
    conf: ServiceConf,
    http_router: axum::Router,
    grpc_router: tonic::transport::server::Router,
    registry: Option<Arc<dyn RegistryBackend>>,
    drain_timeout: Option<Duration>,
}

impl Server {
    /// 便捷入口，等价于 `ServerBuilder::new`
    pub fn builder(conf: ServiceConf) -> ServerBuilder {
        ServerBuilder::new(conf)
    }

    /// 运行服务器直到收到终止信号或交接完成
    ///
    /// 1. 按继承计划取得监听器（热重启时复用父进程的描述符）
    /// 2. 并行启动启用的角色服务器
    /// 3. 监听器就绪后注册到注册中心
    /// 4. 等待信号，排空存量请求
    /// 5. 注销所有登记过的记录（任何退出路径都执行）
    pub async fn serve(self) -> Result<()> {
        crate::utils::init_tracing();

        let service_name = self.conf.name.clone();
        let mut registrar = self.registry.clone().map(InstanceRegistrar::new);

        let result = self.serve_inner(&mut registrar).await;

        if let Some(mut reg) = registrar {
            reg.deregister_all().await;
        }

        match &result {
            Ok(()) => info!(service_name = %service_name, "Server stopped"),
            Err(e) => error!(service_name = %service_name, error = %e, "Server exited with error"),
        }
        result
    }

    async fn serve_inner(self, registrar: &mut Option<InstanceRegistrar>) -> Result<()> {
        let Server {
            conf,
            http_router,
            grpc_router,
            registry: _,
            drain_timeout,
        } = self;

        let plan = InheritancePlan::from_env();
        let grpc_conf = conf.role(ServerRole::Grpc);
        let http_conf = conf.role(ServerRole::Http);
        if grpc_conf.is_none() && http_conf.is_none() {
            return Err(CoreError::config(
                "no server role enabled: set http_port or grpc_port",
            ));
        }

        info!(
            service_name = %conf.name,
            plan = plan.flag(),
            "🚀 Starting server"
        );

        let mut servers: JoinSet<Result<()>> = JoinSet::new();
        let mut shutdowns: Vec<oneshot::Sender<()>> = Vec::new();
        #[cfg(unix)]
        let mut active: Vec<(ServerRole, std::os::fd::RawFd)> = Vec::new();
        let mut ready_probes: Vec<(ServerRole, String, u16)> = Vec::new();

        if let Some(rc) = grpc_conf {
            let handle = ListenerHandle::acquire(&rc, plan).await?;
            let addr = handle.local_addr()?;
            #[cfg(unix)]
            active.push((handle.role, handle.raw_fd));
            ready_probes.push((rc.role, rc.host.clone(), addr.port()));

            let (tx, rx) = oneshot::channel::<()>();
            shutdowns.push(tx);
            info!(
                role = %rc.role,
                addr = %addr,
                inherited = handle.inherited,
                "🚀 gRPC server listening"
            );

            let router = grpc_router;
            servers.spawn(async move {
                router
                    .serve_with_incoming_shutdown(
                        TcpListenerStream::new(handle.listener),
                        async move {
                            let _ = rx.await;
                        },
                    )
                    .await
                    .map_err(|e| CoreError::serve(ServerRole::Grpc, e.to_string()))?;
                info!(role = "grpc", "Server stopped accepting");
                Ok(())
            });
        }

        if let Some(rc) = http_conf {
            let handle = ListenerHandle::acquire(&rc, plan).await?;
            let addr = handle.local_addr()?;
            #[cfg(unix)]
            active.push((handle.role, handle.raw_fd));
            ready_probes.push((rc.role, rc.host.clone(), addr.port()));

            let (tx, rx) = oneshot::channel::<()>();
            shutdowns.push(tx);
            info!(
                role = %rc.role,
                addr = %addr,
                inherited = handle.inherited,
                "🚀 HTTP server listening"
            );

            let keepalive = rc.keepalive.unwrap_or(DEFAULT_HTTP_KEEPALIVE);
            let keep_listener = KeepAliveListener::new(handle.listener, keepalive);
            let router = http_router;
            servers.spawn(async move {
                axum::serve(keep_listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = rx.await;
                    })
                    .await
                    .map_err(|e| CoreError::serve(ServerRole::Http, e.to_string()))?;
                info!(role = "http", "Server stopped accepting");
                Ok(())
            });
        }

        if let Some(reg) = registrar {
            // 监听器真正可连接之后再对外公布
            for (role, host, port) in &ready_probes {
                if let Err(e) = crate::utils::wait_for_server_ready(host, *port).await {
                    warn!(
                        role = %role,
                        error = %e,
                        "Readiness probe failed, registering anyway"
                    );
                }
            }
            reg.register_all(&conf).await;
        }

        #[cfg(unix)]
        let coordinator = ShutdownCoordinator::new(active, drain_timeout);
        #[cfg(not(unix))]
        let coordinator = ShutdownCoordinator::new(drain_timeout);

        coordinator.supervise(servers, shutdowns).await
    }
}
