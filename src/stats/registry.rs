//! 统计处理器注册表
//!
//! 与拦截器注册表相同的注册方式；服务端 / 客户端各自的处理器链只构建一次，之后共享。

use super::{HandlerChain, LoggingStatsHandler, MetricsCollector, MetricsStatsHandler, StatsHandler};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

/// 统计处理器构建函数，参数为是否服务端
pub type StatsBuilder = Arc<dyn Fn(bool) -> Arc<dyn StatsHandler> + Send + Sync>;

/// 统计处理器注册表
pub struct StatsRegistry {
    builders: RwLock<HashMap<String, StatsBuilder>>,
    server: OnceLock<Arc<HandlerChain>>,
    client: OnceLock<Arc<HandlerChain>>,
    metrics: MetricsCollector,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            builders: RwLock::new(HashMap::new()),
            server: OnceLock::new(),
            client: OnceLock::new(),
            metrics: MetricsCollector::new(),
        }
    }

    /// 创建注册表并注册内置处理器：`logging`、`metrics`
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("logging", |is_server| Arc::new(LoggingStatsHandler::new(is_server)));

        let collector = registry.metrics.clone();
        registry.register("metrics", move |_| {
            Arc::new(MetricsStatsHandler::new(collector.clone()))
        });
        registry
    }

    pub fn register<F>(&self, name: &str, builder: F)
    where
        F: Fn(bool) -> Arc<dyn StatsHandler> + Send + Sync + 'static,
    {
        self.builders
            .write()
            .insert(name.to_string(), Arc::new(builder));
        debug!(stats_handler = %name, "Stats handler registered");
    }

    pub fn resolve(&self, name: &str) -> Option<StatsBuilder> {
        self.builders.read().get(name).cloned()
    }

    /// 获取服务端或客户端的处理器链
    ///
    /// 首次调用时按 `names` 构建，之后的调用直接返回同一个实例，`names` 不再生效。
    pub fn handler(&self, is_server: bool, names: &[String]) -> Arc<HandlerChain> {
        let cell = if is_server { &self.server } else { &self.client };
        Arc::clone(cell.get_or_init(|| {
            let mut chain = HandlerChain::default();
            for name in names {
                match self.resolve(name) {
                    Some(builder) => chain.push(builder(is_server)),
                    None => {
                        warn!(stats_handler = %name, "Stats handler not registered, skipping");
                    }
                }
            }
            info!(is_server, handlers = chain.len(), "Stats handler chain built");
            Arc::new(chain)
        }))
    }

    /// 内置 `metrics` 处理器使用的指标收集器
    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
