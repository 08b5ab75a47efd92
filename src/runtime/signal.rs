//! 信号处理与强制退出看门狗

use crate::error::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const SIGINT: i32 = 2;
pub const SIGQUIT: i32 = 3;
pub const SIGTERM: i32 = 15;

/// 进程退出函数，参数为退出码
pub type ExitFn = Arc<dyn Fn(i32) + Send + Sync>;

/// 默认退出函数：`std::process::exit`
pub fn process_exit() -> ExitFn {
    Arc::new(|code| std::process::exit(code))
}

/// 等待终止信号，返回信号编号
#[cfg(unix)]
pub async fn wait_for_signal() -> i32 {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut interrupt, mut terminate, mut quit) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::quit()),
    ) {
        (Ok(interrupt), Ok(terminate), Ok(quit)) => (interrupt, terminate, quit),
        _ => {
            warn!("Failed to install unix signal handlers, falling back to Ctrl-C");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = interrupt.recv() => SIGINT,
        _ = terminate.recv() => SIGTERM,
        _ = quit.recv() => SIGQUIT,
    }
}

/// 等待终止信号，返回信号编号
#[cfg(not(unix))]
pub async fn wait_for_signal() -> i32 {
    ctrl_c().await
}

async fn ctrl_c() -> i32 {
    match tokio::signal::ctrl_c().await {
        Ok(()) => SIGINT,
        Err(e) => {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending().await
        }
    }
}

/// 看门狗结果
#[derive(Debug)]
pub enum ShutdownOutcome {
    /// 优雅关闭在期限内完成
    Graceful(Result<()>),
    /// 超过期限，已调用退出函数
    ForcedExit(i32),
}

/// 强制退出看门狗
///
/// 同时调度两个任务：`graceful-stop` 执行优雅关闭，`force-exit` 在期限到达后
/// 以 `128 + signo` 调用退出函数。先结束的一方决定结果。
pub struct ShutdownWatchdog {
    deadline: Duration,
    exit: ExitFn,
}

impl ShutdownWatchdog {
    pub fn new(deadline: Duration, exit: ExitFn) -> Self {
        Self { deadline, exit }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub async fn run<F>(&self, signo: i32, graceful: F) -> ShutdownOutcome
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let code = 128 + signo;
        let deadline = self.deadline;
        let mut force_exit = tokio::spawn(tokio::time::sleep(deadline));
        let mut graceful_stop = tokio::spawn(graceful);

        tokio::select! {
            joined = &mut graceful_stop => {
                force_exit.abort();
                let result = joined.unwrap_or_else(|e| {
                    Err(Error::internal(format!("graceful stop task failed: {}", e)))
                });
                info!(signo, "Graceful shutdown finished before deadline");
                ShutdownOutcome::Graceful(result)
            }
            _ = &mut force_exit => {
                error!(
                    signo,
                    exit_code = code,
                    deadline_secs = deadline.as_secs_f64(),
                    "❌ Graceful shutdown timed out, forcing exit"
                );
                (self.exit)(code);
                ShutdownOutcome::ForcedExit(code)
            }
        }
    }
}
