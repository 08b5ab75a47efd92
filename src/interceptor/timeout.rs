use super::{AnyMessage, UnaryHandler, UnaryServerInfo, UnaryServerInterceptor};
use crate::error::Status;
use crate::metadata::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// 超时拦截器
///
/// 超过时限后取消调用上下文并返回 `DeadlineExceeded`；
/// 处理器本身只能协作式地感知取消。
#[derive(Debug, Clone, Copy)]
pub struct TimeoutInterceptor {
    timeout: Duration,
}

impl TimeoutInterceptor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Default for TimeoutInterceptor {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl UnaryServerInterceptor for TimeoutInterceptor {
    async fn intercept(
        &self,
        ctx: Context,
        req: AnyMessage,
        info: Arc<UnaryServerInfo>,
        next: UnaryHandler,
    ) -> Result<AnyMessage, Status> {
        let call_ctx = ctx.child();
        match tokio::time::timeout(self.timeout, next.call(call_ctx.clone(), req)).await {
            Ok(result) => result,
            Err(_) => {
                call_ctx.cancel();
                Err(Status::deadline_exceeded(format!(
                    "{} exceeded {:?}",
                    info.full_method, self.timeout
                )))
            }
        }
    }
}
