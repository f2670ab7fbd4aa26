//! 停机协调模块
//!
//! 监听进程信号并驱动服务器退场：终止信号（SIGHUP / SIGINT / SIGTERM）
//! 走排空退出；SIGUSR2 先把监听描述符交给接班进程，再按终止流程排空。
//! 任何一个服务器任务提前退出也会触发整体排空，首个失败原因向上传播。

#[cfg(unix)]
use crate::config::ServerRole;
use crate::error::{CoreError, Result};
#[cfg(unix)]
use crate::server::listener::{GRACE_ENV, InheritancePlan};
#[cfg(unix)]
use std::os::fd::RawFd;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

/// 服务器生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    HandingOff,
    Draining,
    Terminated,
}

/// 停机协调器
///
/// 每个 `Server::serve` 调用持有一个，独占信号处理循环。
pub(crate) struct ShutdownCoordinator {
    #[cfg(unix)]
    listeners: Vec<(ServerRole, RawFd)>,
    drain_timeout: Option<Duration>,
    state: LifecycleState,
}

impl ShutdownCoordinator {
    #[cfg(unix)]
    pub(crate) fn new(
        listeners: Vec<(ServerRole, RawFd)>,
        drain_timeout: Option<Duration>,
    ) -> Self {
        Self {
            listeners,
            drain_timeout,
            state: LifecycleState::Running,
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn new(drain_timeout: Option<Duration>) -> Self {
        Self {
            drain_timeout,
            state: LifecycleState::Running,
        }
    }

    /// 监督服务器任务直到全部退出
    ///
    /// 1. 等待终止信号、交接信号或任一任务提前退出
    /// 2. 给所有任务发送关闭信号
    /// 3. 等待排空（配置了上限则超时后强制取消）
    ///
    /// 返回首个服务器任务的失败原因（若有）。
    pub(crate) async fn supervise(
        mut self,
        mut servers: JoinSet<Result<()>>,
        shutdowns: Vec<oneshot::Sender<()>>,
    ) -> Result<()> {
        let mut first_failure = self.wait_for_exit(&mut servers).await;

        self.state = LifecycleState::Draining;
        info!(state = ?self.state, tasks = servers.len(), "Draining server tasks");
        for tx in shutdowns {
            let _ = tx.send(());
        }

        match self.drain_timeout {
            Some(limit) => {
                let drained =
                    tokio::time::timeout(limit, Self::drain(&mut servers, &mut first_failure))
                        .await;
                if drained.is_err() {
                    warn!(
                        timeout_secs = limit.as_secs(),
                        "⚠️ Drain timeout reached, aborting remaining tasks"
                    );
                    servers.abort_all();
                    while servers.join_next().await.is_some() {}
                }
            }
            None => Self::drain(&mut servers, &mut first_failure).await,
        }

        self.state = LifecycleState::Terminated;
        info!("Shutdown complete");

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 等待退出条件：终止信号、成功交接或任务提前退出
    #[cfg(unix)]
    async fn wait_for_exit(&mut self, servers: &mut JoinSet<Result<()>>) -> Option<CoreError> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup =
            signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        let mut interrupt =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut handoff =
            signal(SignalKind::user_defined2()).expect("failed to install SIGUSR2 handler");

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    info!(signal = "SIGHUP", "🛑 Termination signal received");
                    return None;
                }
                _ = interrupt.recv() => {
                    info!(signal = "SIGINT", "🛑 Termination signal received");
                    return None;
                }
                _ = terminate.recv() => {
                    info!(signal = "SIGTERM", "🛑 Termination signal received");
                    return None;
                }
                _ = handoff.recv() => {
                    self.state = LifecycleState::HandingOff;
                    info!(signal = "SIGUSR2", "Starting listener handoff");
                    match self.spawn_successor() {
                        Ok(pid) => {
                            info!(successor_pid = pid, "✅ Successor started, draining old instance");
                            return None;
                        }
                        Err(e) => {
                            // 交接失败不影响现任：回到运行态继续服务
                            error!(error = %e, "❌ Successor spawn failed, continuing to serve");
                            self.state = LifecycleState::Running;
                        }
                    }
                }
                Some(res) = servers.join_next() => {
                    return Self::note_task_exit(res);
                }
            }
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_exit(&mut self, servers: &mut JoinSet<Result<()>>) -> Option<CoreError> {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Termination signal received (Ctrl+C)");
                None
            }
            Some(res) = servers.join_next() => Self::note_task_exit(res),
        }
    }

    /// 记录一次提前退出的任务结果
    fn note_task_exit(res: std::result::Result<Result<()>, JoinError>) -> Option<CoreError> {
        match res {
            Ok(Ok(())) => {
                warn!("Server task exited before shutdown was requested");
                None
            }
            Ok(Err(e)) => {
                error!(error = %e, "❌ Server task failed");
                Some(e)
            }
            Err(e) => {
                error!(error = %e, "❌ Server task panicked");
                None
            }
        }
    }

    /// 等待任务集合全部结束，记下首个失败
    async fn drain(servers: &mut JoinSet<Result<()>>, first_failure: &mut Option<CoreError>) {
        while let Some(res) = servers.join_next().await {
            match res {
                Ok(Ok(())) => info!("Server task completed gracefully"),
                Ok(Err(e)) => {
                    error!(error = %e, "❌ Server task failed during drain");
                    if first_failure.is_none() {
                        *first_failure = Some(e);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Server task join error");
                }
            }
        }
    }

    /// 拉起接班进程并移交监听描述符
    ///
    /// 描述符先用 F_DUPFD 复制到 10 号以上的高位，再在子进程的
    /// pre_exec 里 dup2 到固定槽位（gRPC 在 3，HTTP 随后），避免与
    /// 标准流或其他低位描述符冲突。父进程侧的高位副本用完即关。
    #[cfg(unix)]
    fn spawn_successor(&self) -> Result<u32> {
        use std::os::unix::process::CommandExt;

        let grpc_fd = self
            .listeners
            .iter()
            .find(|(role, _)| *role == ServerRole::Grpc)
            .map(|(_, fd)| *fd);
        let http_fd = self
            .listeners
            .iter()
            .find(|(role, _)| *role == ServerRole::Http)
            .map(|(_, fd)| *fd);
        let plan = InheritancePlan::for_roles(grpc_fd.is_some(), http_fd.is_some());

        // 槽位顺序与 InheritancePlan::slot 一致：gRPC 在前
        let ordered: Vec<RawFd> = [grpc_fd, http_fd].into_iter().flatten().collect();

        let exe = std::env::current_exe().map_err(CoreError::Spawn)?;

        let mut dups: Vec<RawFd> = Vec::with_capacity(ordered.len());
        for fd in &ordered {
            // SAFETY: F_DUPFD 只分配新描述符，不访问用户内存
            let dup = unsafe { libc::fcntl(*fd, libc::F_DUPFD, 10) };
            if dup < 0 {
                let err = std::io::Error::last_os_error();
                for d in &dups {
                    unsafe { libc::close(*d) };
                }
                return Err(CoreError::Spawn(err));
            }
            dups.push(dup);
        }

        let mut command = std::process::Command::new(exe);
        command
            .args(std::env::args_os().skip(1))
            .env(GRACE_ENV, plan.flag());

        let child_dups = dups.clone();
        // SAFETY: pre_exec 在 fork 出的子进程里执行，只调用
        // async-signal-safe 的 dup2/close
        unsafe {
            command.pre_exec(move || {
                for (i, dup) in child_dups.iter().enumerate() {
                    let target = 3 + i as libc::c_int;
                    if libc::dup2(*dup, target) < 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    libc::close(*dup);
                }
                Ok(())
            });
        }

        let spawn_result = command.spawn();

        for d in &dups {
            unsafe { libc::close(*d) };
        }

        let child = spawn_result.map_err(CoreError::Spawn)?;
        Ok(child.id())
    }
}
