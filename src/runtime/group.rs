//! 任务组

use crate::error::{Error, Result};
use std::future::Future;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 并发任务组
///
/// 等待全部任务结束并返回第一个错误；出现第一个错误时取消组令牌，
/// 由持有令牌的一方决定如何收尾。
pub struct TaskGroup {
    tasks: JoinSet<(String, Result<()>)>,
    token: CancellationToken,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            token: CancellationToken::new(),
        }
    }

    /// 第一个错误出现时被取消的令牌
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn spawn<Fut>(&mut self, name: impl Into<String>, future: Fut)
    where
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        self.tasks.spawn(async move { (name, future.await) });
    }

    /// 等待全部任务结束
    pub async fn wait(mut self) -> Result<()> {
        let mut first = None;
        while let Some(joined) = self.tasks.join_next().await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => (
                    "unknown".to_string(),
                    Err(Error::internal(format!("task panicked or was aborted: {}", e))),
                ),
            };
            match result {
                Ok(()) => info!(task_name = %name, "✅ Task completed"),
                Err(e) => {
                    error!(task_name = %name, error = %e, "❌ Task failed");
                    if first.is_none() {
                        first = Some(e);
                        self.token.cancel();
                    }
                }
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}
