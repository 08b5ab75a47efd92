//! 拦截器模块
//!
//! 四类拦截器（服务端一元、服务端流式、客户端一元、客户端流式）共用一套组合算法：
//! 按名称从 [`InterceptorRegistry`] 解析出拦截器列表，按列表顺序逐层包裹，
//! 最后一层包裹原始处理器 / 调用器。未注册的名称记录告警后跳过。
//!
//! 拦截器可以改写请求、改写响应，也可以不调用 `next` 直接返回（鉴权拒绝等）。

pub mod auth;
pub mod chain;
pub mod logging;
pub mod registry;
pub mod timeout;
pub mod tracing;

pub use auth::{AuthInterceptor, TokenValidator};
pub use chain::{StreamClientChain, StreamServerChain, UnaryClientChain, UnaryServerChain};
pub use logging::LoggingInterceptor;
pub use registry::InterceptorRegistry;
pub use timeout::TimeoutInterceptor;
pub use tracing::{TraceInfo, TracingInterceptor, extract_trace_info};

use crate::client::{ClientStream, ClientStreamDesc};
use crate::error::Status;
use crate::metadata::Context;
use crate::server::ServerStream;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;

/// 类型擦除的消息
pub type AnyMessage = Box<dyn Any + Send>;

/// 服务实现句柄（注册时传入的实现对象）
pub type ServiceHandle = Arc<dyn Any + Send + Sync>;

/// 服务端一元调用信息
#[derive(Clone)]
pub struct UnaryServerInfo {
    /// 完整方法名，如 `/helloworld.Greeter/SayHello`
    pub full_method: String,
    /// 服务实现
    pub server: ServiceHandle,
}

/// 服务端流式调用信息
#[derive(Clone)]
pub struct StreamServerInfo {
    pub full_method: String,
    pub is_client_stream: bool,
    pub is_server_stream: bool,
    pub server: ServiceHandle,
}

// ============================================================
// 终端处理器 / 调用器
// ============================================================

/// 服务端一元处理器
#[derive(Clone)]
pub struct UnaryHandler(
    Arc<dyn Fn(Context, AnyMessage) -> BoxFuture<'static, Result<AnyMessage, Status>> + Send + Sync>,
);

impl UnaryHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, AnyMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AnyMessage, Status>> + Send + 'static,
    {
        Self(Arc::new(move |ctx, req| Box::pin(f(ctx, req))))
    }

    pub fn call(&self, ctx: Context, req: AnyMessage) -> BoxFuture<'static, Result<AnyMessage, Status>> {
        (self.0)(ctx, req)
    }
}

/// 服务端流式处理器
#[derive(Clone)]
pub struct StreamHandler(
    Arc<dyn Fn(Arc<dyn ServerStream>) -> BoxFuture<'static, Result<(), Status>> + Send + Sync>,
);

impl StreamHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<dyn ServerStream>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        Self(Arc::new(move |stream| Box::pin(f(stream))))
    }

    pub fn call(&self, stream: Arc<dyn ServerStream>) -> BoxFuture<'static, Result<(), Status>> {
        (self.0)(stream)
    }
}

/// 客户端一元调用器
#[derive(Clone)]
pub struct UnaryInvoker(
    Arc<
        dyn Fn(Context, String, AnyMessage) -> BoxFuture<'static, Result<AnyMessage, Status>>
            + Send
            + Sync,
    >,
);

impl UnaryInvoker {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, String, AnyMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AnyMessage, Status>> + Send + 'static,
    {
        Self(Arc::new(move |ctx, method, req| Box::pin(f(ctx, method, req))))
    }

    pub fn call(
        &self,
        ctx: Context,
        method: String,
        req: AnyMessage,
    ) -> BoxFuture<'static, Result<AnyMessage, Status>> {
        (self.0)(ctx, method, req)
    }
}

/// 客户端流创建器
#[derive(Clone)]
pub struct Streamer(
    Arc<
        dyn Fn(
                Context,
                Arc<ClientStreamDesc>,
                String,
            ) -> BoxFuture<'static, Result<Box<dyn ClientStream>, Status>>
            + Send
            + Sync,
    >,
);

impl Streamer {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Arc<ClientStreamDesc>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Box<dyn ClientStream>, Status>> + Send + 'static,
    {
        Self(Arc::new(move |ctx, desc, method| Box::pin(f(ctx, desc, method))))
    }

    pub fn call(
        &self,
        ctx: Context,
        desc: Arc<ClientStreamDesc>,
        method: String,
    ) -> BoxFuture<'static, Result<Box<dyn ClientStream>, Status>> {
        (self.0)(ctx, desc, method)
    }
}

// ============================================================
// 拦截器 trait
// ============================================================

/// 服务端一元拦截器
#[async_trait]
pub trait UnaryServerInterceptor: Send + Sync + 'static {
    async fn intercept(
        &self,
        ctx: Context,
        req: AnyMessage,
        info: Arc<UnaryServerInfo>,
        next: UnaryHandler,
    ) -> Result<AnyMessage, Status>;
}

/// 服务端流式拦截器
#[async_trait]
pub trait StreamServerInterceptor: Send + Sync + 'static {
    async fn intercept(
        &self,
        stream: Arc<dyn ServerStream>,
        info: Arc<StreamServerInfo>,
        next: StreamHandler,
    ) -> Result<(), Status>;
}

/// 客户端一元拦截器
#[async_trait]
pub trait UnaryClientInterceptor: Send + Sync + 'static {
    async fn intercept(
        &self,
        ctx: Context,
        method: String,
        req: AnyMessage,
        next: UnaryInvoker,
    ) -> Result<AnyMessage, Status>;
}

/// 客户端流式拦截器
#[async_trait]
pub trait StreamClientInterceptor: Send + Sync + 'static {
    async fn intercept(
        &self,
        ctx: Context,
        desc: Arc<ClientStreamDesc>,
        method: String,
        next: Streamer,
    ) -> Result<Box<dyn ClientStream>, Status>;
}

// 闭包即拦截器

#[async_trait]
impl<F, Fut> UnaryServerInterceptor for F
where
    F: Fn(Context, AnyMessage, Arc<UnaryServerInfo>, UnaryHandler) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AnyMessage, Status>> + Send + 'static,
{
    async fn intercept(
        &self,
        ctx: Context,
        req: AnyMessage,
        info: Arc<UnaryServerInfo>,
        next: UnaryHandler,
    ) -> Result<AnyMessage, Status> {
        (self)(ctx, req, info, next).await
    }
}

#[async_trait]
impl<F, Fut> StreamServerInterceptor for F
where
    F: Fn(Arc<dyn ServerStream>, Arc<StreamServerInfo>, StreamHandler) -> Fut
        + Send
        + Sync
        + 'static,
    Fut: Future<Output = Result<(), Status>> + Send + 'static,
{
    async fn intercept(
        &self,
        stream: Arc<dyn ServerStream>,
        info: Arc<StreamServerInfo>,
        next: StreamHandler,
    ) -> Result<(), Status> {
        (self)(stream, info, next).await
    }
}

#[async_trait]
impl<F, Fut> UnaryClientInterceptor for F
where
    F: Fn(Context, String, AnyMessage, UnaryInvoker) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<AnyMessage, Status>> + Send + 'static,
{
    async fn intercept(
        &self,
        ctx: Context,
        method: String,
        req: AnyMessage,
        next: UnaryInvoker,
    ) -> Result<AnyMessage, Status> {
        (self)(ctx, method, req, next).await
    }
}

#[async_trait]
impl<F, Fut> StreamClientInterceptor for F
where
    F: Fn(Context, Arc<ClientStreamDesc>, String, Streamer) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Box<dyn ClientStream>, Status>> + Send + 'static,
{
    async fn intercept(
        &self,
        ctx: Context,
        desc: Arc<ClientStreamDesc>,
        method: String,
        next: Streamer,
    ) -> Result<Box<dyn ClientStream>, Status> {
        (self)(ctx, desc, method, next).await
    }
}

/// 将类型擦除的消息还原为具体类型
pub fn downcast_message<T: 'static>(msg: AnyMessage) -> Result<T, Status> {
    msg.downcast::<T>().map(|b| *b).map_err(|_| {
        Status::internal(format!(
            "unexpected message type, want {}",
            std::any::type_name::<T>()
        ))
    })
}
