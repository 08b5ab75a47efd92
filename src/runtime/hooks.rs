//! 生命周期钩子

use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// 钩子阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    /// 监听器启动之前
    BeforeStart,
    /// 注销之前
    BeforeStop,
    /// 所有组件停止之后
    AfterStop,
}

impl HookStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::BeforeStart => "before_start",
            HookStage::BeforeStop => "before_stop",
            HookStage::AfterStop => "after_stop",
        }
    }
}

pub type Hook = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// 由异步闭包构造钩子
pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// 按阶段分组的钩子列表
#[derive(Clone, Default)]
pub struct Hooks {
    hooks: HashMap<HookStage, Vec<Hook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, stage: HookStage, hook: Hook) {
        self.hooks.entry(stage).or_default().push(hook);
    }

    pub fn count(&self, stage: HookStage) -> usize {
        self.hooks.get(&stage).map_or(0, Vec::len)
    }

    /// 按注册顺序执行某阶段的全部钩子
    ///
    /// 错误与 panic 只记录日志，不影响后续钩子。
    pub async fn run(&self, stage: HookStage) {
        let Some(hooks) = self.hooks.get(&stage) else {
            return;
        };
        for (index, hook) in hooks.iter().enumerate() {
            let outcome = AssertUnwindSafe(async { hook().await })
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => debug!(stage = stage.as_str(), index, "Hook completed"),
                Ok(Err(e)) => warn!(stage = stage.as_str(), index, error = %e, "⚠️ Hook failed"),
                Err(_) => error!(stage = stage.as_str(), index, "❌ Hook panicked"),
            }
        }
    }
}
