//! 监听器获取模块
//!
//! 监听器有两种来源：热重启时从父进程继承的文件描述符恢复，
//! 或按配置新建绑定。HTTP 监听器在 accept 时设置 TCP keepalive。

use crate::config::{RoleConf, ServerRole};
use crate::error::{CoreError, Result};
use std::net::SocketAddr;
#[cfg(unix)]
use std::os::fd::{AsRawFd, FromRawFd, RawFd};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

/// 热重启环境变量，值描述子进程继承了哪些监听器
pub(crate) const GRACE_ENV: &str = "_GRC_";

/// HTTP 连接 TCP keepalive 周期缺省值
pub(crate) const DEFAULT_HTTP_KEEPALIVE: Duration = Duration::from_secs(180);

/// 继承计划：父进程交给子进程的监听器组合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InheritancePlan {
    None,
    GrpcOnly,
    HttpOnly,
    Both,
}

impl InheritancePlan {
    /// 从环境变量读取本进程的继承计划
    #[cfg(unix)]
    pub(crate) fn from_env() -> Self {
        match std::env::var(GRACE_ENV) {
            Ok(v) => Self::from_flag(&v),
            Err(_) => Self::None,
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn from_env() -> Self {
        Self::None
    }

    /// 解析标志值，未知值一律视为不继承
    pub(crate) fn from_flag(flag: &str) -> Self {
        match flag {
            "1" => Self::GrpcOnly,
            "2" => Self::HttpOnly,
            "3" => Self::Both,
            _ => Self::None,
        }
    }

    /// 写入子进程环境的标志值
    pub(crate) fn flag(&self) -> &'static str {
        match self {
            Self::None => "0",
            Self::GrpcOnly => "1",
            Self::HttpOnly => "2",
            Self::Both => "3",
        }
    }

    /// 按启用的角色组合出交接计划
    pub(crate) fn for_roles(grpc: bool, http: bool) -> Self {
        match (grpc, http) {
            (true, true) => Self::Both,
            (true, false) => Self::GrpcOnly,
            (false, true) => Self::HttpOnly,
            (false, false) => Self::None,
        }
    }

    /// 角色对应的继承描述符槽位
    ///
    /// 从 3 号起连续分配，gRPC 在前、HTTP 在后。
    #[cfg(unix)]
    pub(crate) fn slot(&self, role: ServerRole) -> Option<RawFd> {
        match (self, role) {
            (Self::GrpcOnly, ServerRole::Grpc) => Some(3),
            (Self::HttpOnly, ServerRole::Http) => Some(3),
            (Self::Both, ServerRole::Grpc) => Some(3),
            (Self::Both, ServerRole::Http) => Some(4),
            _ => None,
        }
    }
}

/// 一个就绪的 TCP 监听器及其来源
pub(crate) struct ListenerHandle {
    pub role: ServerRole,
    pub inherited: bool,
    pub listener: TcpListener,
    #[cfg(unix)]
    pub raw_fd: RawFd,
}

impl ListenerHandle {
    /// 按继承计划获取监听器
    ///
    /// 计划里有该角色的槽位就恢复描述符，否则新建绑定。恢复失败
    /// 视为致命错误，不回退到重新绑定（端口可能仍被父进程占用）。
    pub(crate) async fn acquire(rc: &RoleConf, plan: InheritancePlan) -> Result<Self> {
        #[cfg(unix)]
        if let Some(fd) = plan.slot(rc.role) {
            // SAFETY: 槽位描述符由父进程 dup2 到固定位置，本进程独占
            let std_listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
            std_listener
                .set_nonblocking(true)
                .map_err(|e| CoreError::listen(rc.role, e))?;
            let listener =
                TcpListener::from_std(std_listener).map_err(|e| CoreError::listen(rc.role, e))?;
            let raw_fd = listener.as_raw_fd();
            debug!(role = %rc.role, fd, "Restored inherited listener");
            return Ok(Self {
                role: rc.role,
                inherited: true,
                listener,
                raw_fd,
            });
        }

        let listener = TcpListener::bind(rc.addr())
            .await
            .map_err(|e| CoreError::listen(rc.role, e))?;
        debug!(role = %rc.role, addr = %rc.addr(), "Bound new listener");
        #[cfg(unix)]
        {
            let raw_fd = listener.as_raw_fd();
            Ok(Self {
                role: rc.role,
                inherited: false,
                listener,
                raw_fd,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {
                role: rc.role,
                inherited: false,
                listener,
            })
        }
    }

    /// 监听器实际绑定的地址
    pub(crate) fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| CoreError::listen(self.role, e))
    }
}

/// 给每个接入连接设置 TCP keepalive 的监听器包装
pub(crate) struct KeepAliveListener {
    inner: TcpListener,
    period: Duration,
}

impl KeepAliveListener {
    pub(crate) fn new(inner: TcpListener, period: Duration) -> Self {
        Self { inner, period }
    }
}

impl axum::serve::Listener for KeepAliveListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.inner.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = apply_keepalive(&stream, self.period) {
                        warn!(peer = %addr, error = %e, "Failed to set TCP keepalive");
                    }
                    return (stream, addr);
                }
                Err(e) => {
                    // 单个连接级错误（对端提前断开等）不终止 accept 循环
                    warn!(error = %e, "Accept error");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(unix)]
fn apply_keepalive(stream: &TcpStream, period: Duration) -> std::io::Result<()> {
    let fd = stream.as_raw_fd();
    let on: libc::c_int = 1;
    // SAFETY: fd 来自存活的 TcpStream，setsockopt 只读取入参缓冲区
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &on as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }

    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        #[cfg(target_os = "linux")]
        const IDLE_OPT: libc::c_int = libc::TCP_KEEPIDLE;
        #[cfg(target_os = "macos")]
        const IDLE_OPT: libc::c_int = libc::TCP_KEEPALIVE;

        let secs = period.as_secs().max(1) as libc::c_int;
        // SAFETY: 同上
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::IPPROTO_TCP,
                IDLE_OPT,
                &secs as *const libc::c_int as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    Ok(())
}

#[cfg(not(unix))]
fn apply_keepalive(_stream: &TcpStream, _period: Duration) -> std::io::Result<()> {
    Ok(())
}
