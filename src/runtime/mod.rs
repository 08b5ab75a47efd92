//! 应用运行时
//!
//! 提供统一的应用生命周期管理：
//!
//! 1. **单次执行**：`run` / `stop` 各自只执行一次，并发的 `stop` 合并为一次关闭
//! 2. **任务组**：服务端、管理端口、内部服务器、注册任务放在同一个 `JoinSet` 中，第一个错误触发关闭
//! 3. **注册状态机**：`Init → Done → Cancelled`，只向前迁移
//! 4. **优雅停机**：收到信号后优雅关闭，超过期限强制退出
//!
//! # 使用示例
//!
//! ```rust,no_run
//! use flare_rpc_core::config::Config;
//! use flare_rpc_core::plugin::Plugins;
//! use flare_rpc_core::runtime::{Application, with_shutdown_timeout};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> flare_rpc_core::error::Result<()> {
//! let config = Config::load_from_file("config.toml")?;
//! let app = Application::new(config, Arc::new(Plugins::with_builtins()));
//! app.init([with_shutdown_timeout(Duration::from_secs(10))]);
//! app.run().await
//! # }
//! ```

mod application;
pub mod config;
mod group;
mod hooks;
mod once;
mod options;
mod signal;
mod task;

pub use application::{Application, RegistryState};
pub use config::{FORCE_EXIT_FLOOR, RuntimeConfig};
pub use group::TaskGroup;
pub use hooks::{Hook, HookStage, Hooks, hook};
pub use once::OnceFlag;
pub use options::{
    AppOption, with_exit_fn, with_hook, with_internal_server, with_metadata, with_registry,
    with_shutdown_timeout, with_signal_handling,
};
pub use signal::{
    ExitFn, SIGINT, SIGQUIT, SIGTERM, ShutdownOutcome, ShutdownWatchdog, process_exit,
    wait_for_signal,
};
pub use task::{InternalServer, SpawnServer};
