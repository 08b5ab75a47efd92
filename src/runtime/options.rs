//! 应用选项

use super::config::RuntimeConfig;
use super::hooks::{Hook, HookStage, Hooks};
use super::signal::{ExitFn, process_exit};
use super::task::InternalServer;
use crate::registry::Registry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 应用选项，通过 [`Application::init`](super::Application::init) 应用
pub enum AppOption {
    ShutdownTimeout(Duration),
    Registry(Arc<dyn Registry>),
    InternalServer(Arc<dyn InternalServer>),
    Hook(HookStage, Hook),
    SignalHandling(bool),
    ExitFn(ExitFn),
    Metadata(String, String),
}

/// 关闭超时，同时作为强制退出期限（不低于 5 秒）
pub fn with_shutdown_timeout(timeout: Duration) -> AppOption {
    AppOption::ShutdownTimeout(timeout)
}

pub fn with_registry(registry: Arc<dyn Registry>) -> AppOption {
    AppOption::Registry(registry)
}

/// 与主服务端一起调度的内部服务器
pub fn with_internal_server(server: Arc<dyn InternalServer>) -> AppOption {
    AppOption::InternalServer(server)
}

pub fn with_hook(stage: HookStage, hook: Hook) -> AppOption {
    AppOption::Hook(stage, hook)
}

/// 是否监听终止信号，默认开启
pub fn with_signal_handling(enable: bool) -> AppOption {
    AppOption::SignalHandling(enable)
}

/// 替换强制退出时调用的函数
pub fn with_exit_fn<F>(exit: F) -> AppOption
where
    F: Fn(i32) + Send + Sync + 'static,
{
    AppOption::ExitFn(Arc::new(exit))
}

/// 追加到注册实例上的元数据
pub fn with_metadata(key: impl Into<String>, value: impl Into<String>) -> AppOption {
    AppOption::Metadata(key.into(), value.into())
}

#[derive(Clone)]
pub(crate) struct AppOptions {
    pub runtime: RuntimeConfig,
    pub registry: Option<Arc<dyn Registry>>,
    pub internal_servers: Vec<Arc<dyn InternalServer>>,
    pub hooks: Hooks,
    pub exit_fn: ExitFn,
    pub metadata: HashMap<String, String>,
}

impl AppOptions {
    pub fn new(runtime: RuntimeConfig) -> Self {
        Self {
            runtime,
            registry: None,
            internal_servers: Vec::new(),
            hooks: Hooks::new(),
            exit_fn: process_exit(),
            metadata: HashMap::new(),
        }
    }

    pub fn apply(&mut self, option: AppOption) {
        match option {
            AppOption::ShutdownTimeout(timeout) => self.runtime.shutdown_timeout = timeout,
            AppOption::Registry(registry) => self.registry = Some(registry),
            AppOption::InternalServer(server) => self.internal_servers.push(server),
            AppOption::Hook(stage, hook) => self.hooks.add(stage, hook),
            AppOption::SignalHandling(enable) => self.runtime.handle_signals = enable,
            AppOption::ExitFn(exit) => self.exit_fn = exit,
            AppOption::Metadata(key, value) => {
                self.metadata.insert(key, value);
            }
        }
    }
}
