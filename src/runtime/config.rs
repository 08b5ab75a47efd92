//! 运行时配置模块

use crate::config::AppConfig;
use std::time::Duration;

/// 强制退出的最短等待时间
pub const FORCE_EXIT_FLOOR: Duration = Duration::from_secs(5);

/// 运行时配置
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// 关闭超时时间（默认 30 秒），同时限制注销耗时
    pub shutdown_timeout: Duration,
    /// 服务注册超时时间（默认 5 秒）
    pub registry_timeout: Duration,
    /// 收到信号后强制退出的最短等待时间
    pub force_exit_floor: Duration,
    /// 是否监听终止信号（默认 true）
    pub handle_signals: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
            registry_timeout: Duration::from_secs(5),
            force_exit_floor: FORCE_EXIT_FLOOR,
            handle_signals: true,
        }
    }
}

impl RuntimeConfig {
    /// 创建默认配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 从应用配置读取超时设置
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            shutdown_timeout: app.shutdown_timeout(),
            registry_timeout: app.registry_timeout(),
            ..Self::default()
        }
    }

    /// 设置关闭超时时间
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// 设置服务注册超时时间
    pub fn with_registry_timeout(mut self, timeout: Duration) -> Self {
        self.registry_timeout = timeout;
        self
    }

    /// 启用/禁用信号处理
    pub fn with_signal_handling(mut self, enable: bool) -> Self {
        self.handle_signals = enable;
        self
    }

    /// 收到信号后等待多久强制退出
    pub fn force_exit_after(&self) -> Duration {
        self.shutdown_timeout.max(self.force_exit_floor)
    }
}
