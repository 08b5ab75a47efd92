//! 协议插件
//!
//! 每种传输协议提供一个 [`Builder`]，按 [`ProtocolConfig`] 构建 [`Listener`]。
//! 监听器把收到的调用包装成 `ServerStream` 交给分发器。

pub mod http;
pub mod inproc;

pub use crate::config::ProtocolConfig;
pub use http::HttpBuilder;
pub use inproc::{InProcBuilder, InProcChannel, InProcNetwork};

use crate::error::Result;
use crate::server::MethodHandle;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// 监听器信息
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ListenerInfo {
    pub protocol: String,
    /// 实际绑定的地址（`start` 之后有效）
    pub address: String,
    pub attributes: HashMap<String, String>,
}

/// 协议构建器
pub trait Builder: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn build(&self, config: &ProtocolConfig, handle: MethodHandle) -> Result<Arc<dyn Listener>>;
}

/// 协议监听器
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// 绑定地址，失败时不进入 `handle`
    async fn start(&self) -> Result<()>;

    /// 处理入站调用，阻塞到 `stop` 之后所有进行中的调用结束
    async fn handle(&self) -> Result<()>;

    /// 停止接收新调用
    async fn stop(&self) -> Result<()>;

    fn info(&self) -> ListenerInfo;
}

/// 协议构建器注册表
#[derive(Default)]
pub struct ProtocolRegistry {
    builders: RwLock<HashMap<String, Arc<dyn Builder>>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建注册表并注册内置的 `http` 协议
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(HttpBuilder::new());
        registry
    }

    pub fn register<B: Builder>(&self, builder: B) {
        let name = builder.name().to_string();
        if self
            .builders
            .write()
            .insert(name.clone(), Arc::new(builder))
            .is_some()
        {
            warn!(protocol = %name, "Protocol builder replaced");
        } else {
            debug!(protocol = %name, "Protocol builder registered");
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Builder>> {
        self.builders.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builders.read().keys().cloned().collect();
        names.sort();
        names
    }
}
