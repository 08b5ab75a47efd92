//! 拦截器链组合
//!
//! 列表中的第一个拦截器位于最外层：执行顺序与列表顺序一致，
//! 最后一个拦截器包裹终端处理器。空链直接调用终端处理器，不产生任何包装。

use super::{
    AnyMessage, StreamClientInterceptor, StreamHandler, StreamServerInfo, StreamServerInterceptor,
    Streamer, UnaryClientInterceptor, UnaryHandler, UnaryInvoker, UnaryServerInfo,
    UnaryServerInterceptor,
};
use crate::client::{ClientStream, ClientStreamDesc};
use crate::error::Status;
use crate::metadata::Context;
use crate::server::ServerStream;
use std::sync::Arc;

/// 服务端一元拦截器链
#[derive(Clone, Default)]
pub struct UnaryServerChain {
    interceptors: Vec<Arc<dyn UnaryServerInterceptor>>,
}

impl UnaryServerChain {
    pub fn new(interceptors: Vec<Arc<dyn UnaryServerInterceptor>>) -> Self {
        Self { interceptors }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// 将处理器包裹为完整的调用管道
    pub fn wrap(&self, info: Arc<UnaryServerInfo>, handler: UnaryHandler) -> UnaryHandler {
        let mut next = handler;
        for interceptor in self.interceptors.iter().rev() {
            let interceptor = Arc::clone(interceptor);
            let info = Arc::clone(&info);
            let inner = next;
            next = UnaryHandler::new(move |ctx, req| {
                let interceptor = Arc::clone(&interceptor);
                let info = Arc::clone(&info);
                let inner = inner.clone();
                async move { interceptor.intercept(ctx, req, info, inner).await }
            });
        }
        next
    }

    /// 经过拦截器链调用处理器
    pub async fn call(
        &self,
        ctx: Context,
        req: AnyMessage,
        info: Arc<UnaryServerInfo>,
        handler: UnaryHandler,
    ) -> Result<AnyMessage, Status> {
        self.wrap(info, handler).call(ctx, req).await
    }
}

/// 服务端流式拦截器链
#[derive(Clone, Default)]
pub struct StreamServerChain {
    interceptors: Vec<Arc<dyn StreamServerInterceptor>>,
}

impl StreamServerChain {
    pub fn new(interceptors: Vec<Arc<dyn StreamServerInterceptor>>) -> Self {
        Self { interceptors }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn wrap(&self, info: Arc<StreamServerInfo>, handler: StreamHandler) -> StreamHandler {
        let mut next = handler;
        for interceptor in self.interceptors.iter().rev() {
            let interceptor = Arc::clone(interceptor);
            let info = Arc::clone(&info);
            let inner = next;
            next = StreamHandler::new(move |stream| {
                let interceptor = Arc::clone(&interceptor);
                let info = Arc::clone(&info);
                let inner = inner.clone();
                async move { interceptor.intercept(stream, info, inner).await }
            });
        }
        next
    }

    pub async fn call(
        &self,
        stream: Arc<dyn ServerStream>,
        info: Arc<StreamServerInfo>,
        handler: StreamHandler,
    ) -> Result<(), Status> {
        self.wrap(info, handler).call(stream).await
    }
}

/// 客户端一元拦截器链
#[derive(Clone, Default)]
pub struct UnaryClientChain {
    interceptors: Vec<Arc<dyn UnaryClientInterceptor>>,
}

impl UnaryClientChain {
    pub fn new(interceptors: Vec<Arc<dyn UnaryClientInterceptor>>) -> Self {
        Self { interceptors }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn wrap(&self, invoker: UnaryInvoker) -> UnaryInvoker {
        let mut next = invoker;
        for interceptor in self.interceptors.iter().rev() {
            let interceptor = Arc::clone(interceptor);
            let inner = next;
            next = UnaryInvoker::new(move |ctx, method, req| {
                let interceptor = Arc::clone(&interceptor);
                let inner = inner.clone();
                async move { interceptor.intercept(ctx, method, req, inner).await }
            });
        }
        next
    }

    pub async fn call(
        &self,
        ctx: Context,
        method: String,
        req: AnyMessage,
        invoker: UnaryInvoker,
    ) -> Result<AnyMessage, Status> {
        self.wrap(invoker).call(ctx, method, req).await
    }
}

/// 客户端流式拦截器链
#[derive(Clone, Default)]
pub struct StreamClientChain {
    interceptors: Vec<Arc<dyn StreamClientInterceptor>>,
}

impl StreamClientChain {
    pub fn new(interceptors: Vec<Arc<dyn StreamClientInterceptor>>) -> Self {
        Self { interceptors }
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn wrap(&self, streamer: Streamer) -> Streamer {
        let mut next = streamer;
        for interceptor in self.interceptors.iter().rev() {
            let interceptor = Arc::clone(interceptor);
            let inner = next;
            next = Streamer::new(move |ctx, desc, method| {
                let interceptor = Arc::clone(&interceptor);
                let inner = inner.clone();
                async move { interceptor.intercept(ctx, desc, method, inner).await }
            });
        }
        next
    }

    pub async fn call(
        &self,
        ctx: Context,
        desc: Arc<ClientStreamDesc>,
        method: String,
        streamer: Streamer,
    ) -> Result<Box<dyn ClientStream>, Status> {
        self.wrap(streamer).call(ctx, desc, method).await
    }
}
