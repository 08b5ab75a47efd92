use super::{
    AnyMessage, StreamHandler, StreamServerInfo, StreamServerInterceptor, UnaryClientInterceptor,
    UnaryHandler, UnaryInvoker, UnaryServerInfo, UnaryServerInterceptor,
};
use crate::error::Status;
use crate::metadata::Context;
use crate::server::ServerStream;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// 日志拦截器
///
/// 记录方法名、状态码与耗时
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self
    }
}

fn log_outcome(side: &'static str, method: &str, start: Instant, error: Option<&Status>) {
    let elapsed_ms = start.elapsed().as_millis() as u64;
    match error {
        None => info!(side, method = %method, elapsed_ms, code = "OK", "RPC completed"),
        Some(status) => warn!(
            side,
            method = %method,
            elapsed_ms,
            code = %status.code(),
            error = %status.message(),
            "RPC failed"
        ),
    }
}

#[async_trait]
impl UnaryServerInterceptor for LoggingInterceptor {
    async fn intercept(
        &self,
        ctx: Context,
        req: AnyMessage,
        info: Arc<UnaryServerInfo>,
        next: UnaryHandler,
    ) -> Result<AnyMessage, Status> {
        let start = Instant::now();
        let result = next.call(ctx, req).await;
        log_outcome("server", &info.full_method, start, result.as_ref().err());
        result
    }
}

#[async_trait]
impl StreamServerInterceptor for LoggingInterceptor {
    async fn intercept(
        &self,
        stream: Arc<dyn ServerStream>,
        info: Arc<StreamServerInfo>,
        next: StreamHandler,
    ) -> Result<(), Status> {
        let start = Instant::now();
        let result = next.call(stream).await;
        log_outcome("server", &info.full_method, start, result.as_ref().err());
        result
    }
}

#[async_trait]
impl UnaryClientInterceptor for LoggingInterceptor {
    async fn intercept(
        &self,
        ctx: Context,
        method: String,
        req: AnyMessage,
        next: UnaryInvoker,
    ) -> Result<AnyMessage, Status> {
        let start = Instant::now();
        let result = next.call(ctx, method.clone(), req).await;
        log_outcome("client", &method, start, result.as_ref().err());
        result
    }
}
