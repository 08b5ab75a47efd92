//! 单次执行保护

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// 原子 CAS 单次执行标记
///
/// 第一个 `try_begin` 成功的调用方负责执行并在结束时调用 `complete`，
/// 其余调用方可以通过 `wait` 等待执行结束。
pub struct OnceFlag {
    started: AtomicBool,
    done: watch::Sender<bool>,
}

impl OnceFlag {
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            started: AtomicBool::new(false),
            done,
        }
    }

    /// 抢占执行权，只有第一次调用返回 `true`
    pub fn try_begin(&self) -> bool {
        self.started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// 标记执行结束并唤醒等待方
    pub fn complete(&self) {
        self.done.send_replace(true);
    }

    /// 等待执行结束
    pub async fn wait(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

impl Default for OnceFlag {
    fn default() -> Self {
        Self::new()
    }
}
