use super::{
    AnyMessage, StreamHandler, StreamServerInfo, StreamServerInterceptor, UnaryHandler,
    UnaryServerInfo, UnaryServerInterceptor,
};
use crate::error::Status;
use crate::metadata::Context;
use crate::server::ServerStream;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// 令牌校验器
#[async_trait]
pub trait TokenValidator: Send + Sync + 'static {
    /// 校验令牌，返回主体标识
    async fn validate(&self, token: &str, full_method: &str) -> Result<String, Status>;
}

/// 认证拦截器
///
/// 从入站元数据 `authorization` 提取 Bearer 令牌，校验失败时不调用后续处理器，
/// 直接返回 `Unauthenticated`。需要宿主显式注册。
pub struct AuthInterceptor {
    validator: Arc<dyn TokenValidator>,
    skip_methods: Vec<String>,
}

impl AuthInterceptor {
    pub fn new(validator: Arc<dyn TokenValidator>) -> Self {
        Self {
            validator,
            skip_methods: Vec::new(),
        }
    }

    /// 跳过认证的方法（完整方法名）
    pub fn skip_method(mut self, full_method: impl Into<String>) -> Self {
        self.skip_methods.push(full_method.into());
        self
    }

    async fn authenticate(&self, ctx: &Context, full_method: &str) -> Result<(), Status> {
        if self.skip_methods.iter().any(|m| m == full_method) {
            return Ok(());
        }

        let inbound = ctx.inbound().unwrap_or_default();
        let token = inbound
            .get_first("authorization")
            .map(|s| s.strip_prefix("Bearer ").unwrap_or(s).to_string())
            .ok_or_else(|| Status::unauthenticated("Missing authorization token"))?;

        match self.validator.validate(&token, full_method).await {
            Ok(subject) => {
                debug!(subject = %subject, method = %full_method, "Request authenticated");
                Ok(())
            }
            Err(status) => {
                warn!(method = %full_method, error = %status, "Invalid token");
                Err(Status::unauthenticated("Invalid token"))
            }
        }
    }
}

#[async_trait]
impl UnaryServerInterceptor for AuthInterceptor {
    async fn intercept(
        &self,
        ctx: Context,
        req: AnyMessage,
        info: Arc<UnaryServerInfo>,
        next: UnaryHandler,
    ) -> Result<AnyMessage, Status> {
        self.authenticate(&ctx, &info.full_method).await?;
        next.call(ctx, req).await
    }
}

#[async_trait]
impl StreamServerInterceptor for AuthInterceptor {
    async fn intercept(
        &self,
        stream: Arc<dyn ServerStream>,
        info: Arc<StreamServerInfo>,
        next: StreamHandler,
    ) -> Result<(), Status> {
        self.authenticate(stream.context(), &info.full_method).await?;
        next.call(stream).await
    }
}
