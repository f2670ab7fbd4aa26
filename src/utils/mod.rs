//! 工具函数模块

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// 初始化全局日志订阅器（幂等）
///
/// 过滤规则取 `RUST_LOG`，未设置时默认 `info`。
/// 嵌入方已安装自己的订阅器时静默让位。
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .try_init();
    });
}

/// 探测本机内网通告地址
///
/// 通过 UDP connect 取默认出口地址（不产生网络流量），
/// 出口地址不在内网段时回退 `127.0.0.1`。
pub fn private_address() -> String {
    fn egress_v4() -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect(("8.8.8.8", 80)).ok()?;
        match socket.local_addr().ok()? {
            SocketAddr::V4(addr) if addr.ip().is_private() => Some(*addr.ip()),
            _ => None,
        }
    }

    egress_v4()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// 等待服务启动就绪（通过 TCP 连接重试）
///
/// 使用指数退避重试连接，直到服务真正可以接受连接，
/// 用于在注册服务前确认监听器已经开始工作。
pub async fn wait_for_server_ready(
    host: &str,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::time::{sleep, timeout};
    use tracing::debug;

    const MAX_RETRIES: u32 = 30;
    const INITIAL_DELAY_MS: u64 = 50;
    const MAX_DELAY_MS: u64 = 500;
    const TOTAL_TIMEOUT_SECS: u64 = 10;

    let start = std::time::Instant::now();
    let mut delay_ms = INITIAL_DELAY_MS;

    for attempt in 1..=MAX_RETRIES {
        if start.elapsed().as_secs() > TOTAL_TIMEOUT_SECS {
            return Err(format!(
                "server readiness check timeout after {} seconds",
                TOTAL_TIMEOUT_SECS
            )
            .into());
        }

        match timeout(Duration::from_millis(100), TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => {
                debug!(
                    host = %host,
                    port = port,
                    attempts = attempt,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Server is ready"
                );
                return Ok(());
            }
            Ok(Err(e)) => {
                debug!(
                    host = %host,
                    port = port,
                    attempt = attempt,
                    error = %e,
                    "Connection attempt failed, retrying..."
                );
            }
            Err(_) => {
                debug!(
                    host = %host,
                    port = port,
                    attempt = attempt,
                    "Connection attempt timed out, retrying..."
                );
            }
        }

        sleep(Duration::from_millis(delay_ms)).await;
        delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
    }

    Err(format!("server readiness check failed after {} attempts", MAX_RETRIES).into())
}
