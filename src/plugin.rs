//! 插件注册表集合
//!
//! 协议、拦截器、统计处理器都通过显式的注册表对象按名称查找，
//! 由宿主在启动前组装好后交给 `Server` / `Client` / `Application`。

use crate::interceptor::InterceptorRegistry;
use crate::protocol::ProtocolRegistry;
use crate::stats::StatsRegistry;

#[derive(Default)]
pub struct Plugins {
    pub protocols: ProtocolRegistry,
    pub interceptors: InterceptorRegistry,
    pub stats: StatsRegistry,
}

impl Plugins {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全部内置插件：`http` 协议，`logging` / `tracing` / `timeout` 拦截器，
    /// `logging` / `metrics` 统计处理器
    pub fn with_builtins() -> Self {
        Self {
            protocols: ProtocolRegistry::with_builtins(),
            interceptors: InterceptorRegistry::with_builtins(),
            stats: StatsRegistry::with_builtins(),
        }
    }
}
