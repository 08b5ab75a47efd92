//! 拦截器注册表
//!
//! 显式持有的名称到工厂的映射，宿主在启动前完成注册；
//! 构建拦截器链时按名称解析，未注册的名称只记录告警。

use super::{
    LoggingInterceptor, StreamClientChain, StreamClientInterceptor, StreamServerChain,
    StreamServerInterceptor, TimeoutInterceptor, TracingInterceptor, UnaryClientChain,
    UnaryClientInterceptor, UnaryServerChain, UnaryServerInterceptor,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// 拦截器工厂
pub type Factory<T> = Arc<dyn Fn() -> Arc<T> + Send + Sync>;

struct Factories<T: ?Sized> {
    kind: &'static str,
    map: RwLock<HashMap<String, Factory<T>>>,
}

impl<T: ?Sized> Factories<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            map: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, name: &str, factory: Factory<T>) {
        let replaced = self.map.write().insert(name.to_string(), factory).is_some();
        if replaced {
            warn!(interceptor = %name, kind = self.kind, "Interceptor re-registered, previous factory replaced");
        } else {
            debug!(interceptor = %name, kind = self.kind, "Interceptor registered");
        }
    }

    fn resolve(&self, name: &str) -> Option<Factory<T>> {
        self.map.read().get(name).cloned()
    }

    fn build(&self, names: &[String]) -> Vec<Arc<T>> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            match self.resolve(name) {
                Some(factory) => out.push(factory()),
                None => {
                    warn!(interceptor = %name, kind = self.kind, "Interceptor not registered, skipping");
                }
            }
        }
        out
    }
}

/// 拦截器注册表
pub struct InterceptorRegistry {
    unary_server: Factories<dyn UnaryServerInterceptor>,
    stream_server: Factories<dyn StreamServerInterceptor>,
    unary_client: Factories<dyn UnaryClientInterceptor>,
    stream_client: Factories<dyn StreamClientInterceptor>,
}

impl InterceptorRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self {
            unary_server: Factories::new("unary_server"),
            stream_server: Factories::new("stream_server"),
            unary_client: Factories::new("unary_client"),
            stream_client: Factories::new("stream_client"),
        }
    }

    /// 创建注册表并注册内置拦截器：`logging`、`tracing`、`timeout`
    pub fn with_builtins() -> Self {
        let registry = Self::new();

        registry.register_unary_server("logging", || Arc::new(LoggingInterceptor::new()));
        registry.register_stream_server("logging", || Arc::new(LoggingInterceptor::new()));
        registry.register_unary_client("logging", || Arc::new(LoggingInterceptor::new()));

        registry.register_unary_server("tracing", || Arc::new(TracingInterceptor::new()));
        registry.register_stream_server("tracing", || Arc::new(TracingInterceptor::new()));

        registry.register_unary_server("timeout", || Arc::new(TimeoutInterceptor::default()));

        registry
    }

    // ============================================================
    // 注册
    // ============================================================

    pub fn register_unary_server<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn UnaryServerInterceptor> + Send + Sync + 'static,
    {
        self.unary_server.register(name, Arc::new(factory));
    }

    pub fn register_stream_server<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn StreamServerInterceptor> + Send + Sync + 'static,
    {
        self.stream_server.register(name, Arc::new(factory));
    }

    pub fn register_unary_client<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn UnaryClientInterceptor> + Send + Sync + 'static,
    {
        self.unary_client.register(name, Arc::new(factory));
    }

    pub fn register_stream_client<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Arc<dyn StreamClientInterceptor> + Send + Sync + 'static,
    {
        self.stream_client.register(name, Arc::new(factory));
    }

    // ============================================================
    // 解析
    // ============================================================

    pub fn resolve_unary_server(&self, name: &str) -> Option<Factory<dyn UnaryServerInterceptor>> {
        self.unary_server.resolve(name)
    }

    pub fn resolve_stream_server(
        &self,
        name: &str,
    ) -> Option<Factory<dyn StreamServerInterceptor>> {
        self.stream_server.resolve(name)
    }

    pub fn resolve_unary_client(&self, name: &str) -> Option<Factory<dyn UnaryClientInterceptor>> {
        self.unary_client.resolve(name)
    }

    pub fn resolve_stream_client(
        &self,
        name: &str,
    ) -> Option<Factory<dyn StreamClientInterceptor>> {
        self.stream_client.resolve(name)
    }

    // ============================================================
    // 构建拦截器链
    // ============================================================

    pub fn build_unary_server_chain(&self, names: &[String]) -> UnaryServerChain {
        UnaryServerChain::new(self.unary_server.build(names))
    }

    pub fn build_stream_server_chain(&self, names: &[String]) -> StreamServerChain {
        StreamServerChain::new(self.stream_server.build(names))
    }

    pub fn build_unary_client_chain(&self, names: &[String]) -> UnaryClientChain {
        UnaryClientChain::new(self.unary_client.build(names))
    }

    pub fn build_stream_client_chain(&self, names: &[String]) -> StreamClientChain {
        StreamClientChain::new(self.stream_client.build(names))
    }
}

impl Default for InterceptorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
