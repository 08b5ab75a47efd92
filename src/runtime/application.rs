//! 应用编排
//!
//! [`Application`] 把主服务端、管理端口、内部服务器与注册中心放进同一个任务组调度，
//! 并保证 `run` / `stop` 各自只执行一次。
//!
//! 启动顺序：BeforeStart 钩子 → 并发启动（服务端、管理端口、内部服务器、等待就绪后注册）。
//! 关闭顺序：标记不可用 → BeforeStop 钩子 → 注销 → 并发停止所有组件 → AfterStop 钩子。

use super::config::RuntimeConfig;
use super::group::TaskGroup;
use super::hooks::HookStage;
use super::once::OnceFlag;
use super::options::{AppOption, AppOptions};
use super::signal::{ShutdownOutcome, ShutdownWatchdog, wait_for_signal};
use super::task::InternalServer;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::governor::Governor;
use crate::health::HealthService;
use crate::metadata::Context;
use crate::plugin::Plugins;
use crate::registry::{Endpoint, Instance};
use crate::server::{Server, ServiceDesc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// 注册状态，只能向前迁移：`Init → Done → Cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    Init,
    Done,
    Cancelled,
}

/// 应用
#[derive(Clone)]
pub struct Application {
    inner: Arc<AppInner>,
}

struct AppInner {
    config: Config,
    server: Arc<Server>,
    health: HealthService,
    governor: Option<Arc<Governor>>,
    options: RwLock<AppOptions>,
    running: AtomicBool,
    run_once: OnceFlag,
    stop_once: OnceFlag,
    registry_state: tokio::sync::Mutex<RegistryState>,
    registered: Mutex<Option<Instance>>,
}

impl Application {
    pub fn new(config: Config, plugins: Arc<Plugins>) -> Self {
        let server = Arc::new(Server::new(config.server.clone(), Arc::clone(&plugins)));
        let health = HealthService::new();
        let governor = config.governor.enabled.then(|| {
            let metrics = config
                .server
                .stats_handlers
                .iter()
                .any(|name| name == "metrics")
                .then(|| plugins.stats.metrics());
            Arc::new(Governor::new(
                config.governor.address.clone(),
                Arc::clone(&server),
                health.clone(),
                metrics,
            ))
        });
        let options = AppOptions::new(RuntimeConfig::from_app(&config.app));

        Self {
            inner: Arc::new(AppInner {
                config,
                server,
                health,
                governor,
                options: RwLock::new(options),
                running: AtomicBool::new(false),
                run_once: OnceFlag::new(),
                stop_once: OnceFlag::new(),
                registry_state: tokio::sync::Mutex::new(RegistryState::Init),
                registered: Mutex::new(None),
            }),
        }
    }

    /// 应用选项，运行之后调用只记录警告
    pub fn init(&self, options: impl IntoIterator<Item = AppOption>) {
        if self.is_running() {
            warn!("Application is running, options are ignored");
            return;
        }
        let mut current = self.inner.options.write();
        for option in options {
            current.apply(option);
        }
    }

    /// 注册服务，失败时退出进程
    pub fn register_service<S>(&self, desc: ServiceDesc<S>, imp: Arc<S>)
    where
        S: ?Sized + Send + Sync + 'static,
    {
        if let Err(e) = self.try_register_service(desc, imp) {
            error!(error = %e, "❌ Fatal service registration error");
            std::process::exit(1);
        }
    }

    pub fn try_register_service<S>(&self, desc: ServiceDesc<S>, imp: Arc<S>) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.inner.server.register_service(desc, imp)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.inner.server
    }

    pub fn health(&self) -> &HealthService {
        &self.inner.health
    }

    pub fn governor(&self) -> Option<&Arc<Governor>> {
        self.inner.governor.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub async fn registry_state(&self) -> RegistryState {
        *self.inner.registry_state.lock().await
    }

    /// 运行到关闭为止，返回第一个致命错误
    pub async fn run(&self) -> Result<()> {
        if !self.inner.run_once.try_begin() {
            return Err(Error::internal("application already ran"));
        }
        if self.inner.stop_once.is_started() {
            return Err(Error::ServerClosed);
        }
        self.inner.running.store(true, Ordering::Release);

        let options = self.inner.options.read().clone();
        let app = &self.inner.config.app;
        info!(
            namespace = %app.namespace,
            name = %app.name,
            version = %app.version,
            instance_id = %app.instance_id,
            "🚀 Starting application"
        );

        options.hooks.run(HookStage::BeforeStart).await;

        let mut group = TaskGroup::new();
        let (ready_tx, ready_rx) = oneshot::channel();

        let server = Arc::clone(&self.inner.server);
        group.spawn("server", async move {
            match server.serve(ready_tx).await {
                Err(Error::ServerClosed) => Ok(()),
                result => result,
            }
        });

        if let Some(governor) = &self.inner.governor {
            let governor: Arc<dyn InternalServer> = governor.clone();
            group.spawn("governor", serve_internal(governor));
        }
        for internal in &options.internal_servers {
            group.spawn(internal.name().to_string(), serve_internal(Arc::clone(internal)));
        }

        let this = self.clone();
        group.spawn("registry", async move {
            if ready_rx.await.is_err() {
                debug!("Server never became ready, skipping registration");
                return Ok(());
            }
            if this.inner.stop_once.is_started() {
                debug!("Application is stopping, not marking services serving");
                return Ok(());
            }
            let services = this
                .inner
                .server
                .service_infos()
                .into_iter()
                .map(|info| info.name);
            this.inner.health.set_serving(services).await;
            if this.inner.stop_once.is_started() {
                this.inner.health.set_not_serving().await;
                return Ok(());
            }
            this.register().await
        });

        let token = group.token();
        let this = self.clone();
        let watcher = tokio::spawn(async move {
            token.cancelled().await;
            warn!("Task group failed, stopping application");
            if let Err(e) = this.stop().await {
                error!(error = %e, "Stop after task failure returned errors");
            }
        });

        let signal_task = options.runtime.handle_signals.then(|| {
            let this = self.clone();
            let watchdog = ShutdownWatchdog::new(
                options.runtime.force_exit_after(),
                Arc::clone(&options.exit_fn),
            );
            tokio::spawn(async move {
                let signo = wait_for_signal().await;
                info!(signo, "Shutdown signal received");
                let app = this.clone();
                match watchdog.run(signo, async move { app.stop().await }).await {
                    ShutdownOutcome::Graceful(Err(e)) => {
                        error!(error = %e, "Graceful shutdown returned errors")
                    }
                    ShutdownOutcome::Graceful(Ok(())) => {}
                    ShutdownOutcome::ForcedExit(code) => warn!(exit_code = code, "Process forced to exit"),
                }
            })
        });

        let cancelled = group.token();
        let result = group.wait().await;
        if cancelled.is_cancelled() {
            let _ = watcher.await;
        } else {
            watcher.abort();
        }

        let mut stop_error = None;
        if !self.inner.stop_once.is_started() {
            debug!("All tasks finished, stopping application");
            stop_error = self.stop().await.err();
        }
        self.inner.stop_once.wait().await;

        if let Some(task) = signal_task {
            task.abort();
        }

        info!("Application exited");
        match (result, stop_error) {
            (Err(e), _) => Err(e),
            (Ok(()), Some(e)) => Err(e),
            (Ok(()), None) => Ok(()),
        }
    }

    /// 停止应用
    ///
    /// 只有第一次调用执行关闭流程，其余调用等待它结束后返回 `Ok(())`。
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.stop_once.try_begin() {
            self.inner.stop_once.wait().await;
            return Ok(());
        }
        let result = self.shutdown().await;
        self.inner.running.store(false, Ordering::Release);
        self.inner.stop_once.complete();
        result
    }

    async fn shutdown(&self) -> Result<()> {
        info!(name = %self.inner.config.app.name, "Stopping application");
        let options = self.inner.options.read().clone();

        self.inner.health.set_not_serving().await;
        options.hooks.run(HookStage::BeforeStop).await;

        match tokio::time::timeout(options.runtime.shutdown_timeout, self.deregister()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "⚠️ Deregistration failed"),
            Err(_) => warn!(
                timeout_secs = options.runtime.shutdown_timeout.as_secs(),
                "⚠️ Deregistration timed out"
            ),
        }

        let governor = self.inner.governor.clone();
        let governor_stop = async move {
            match governor {
                Some(governor) => stop_internal(governor).await,
                None => Ok(()),
            }
        };
        let internal_stops = futures::future::join_all(
            options
                .internal_servers
                .iter()
                .map(|internal| stop_internal(Arc::clone(internal))),
        );
        let (server_result, governor_result, internal_results) =
            tokio::join!(self.inner.server.stop(), governor_stop, internal_stops);

        let mut errors = Vec::new();
        errors.extend(server_result.err().map(Error::flatten).unwrap_or_default());
        errors.extend(governor_result.err());
        errors.extend(internal_results.into_iter().filter_map(|r| r.err()));

        options.hooks.run(HookStage::AfterStop).await;

        match Error::join(errors) {
            Some(e) => {
                error!(error = %e, "❌ Application stopped with errors");
                Err(e)
            }
            None => {
                info!("✅ Application stopped");
                Ok(())
            }
        }
    }

    /// 向注册中心注册
    ///
    /// 并发调用只会发出一次注册请求；已注册、已注销或正在关闭时直接返回。
    /// 注册失败会异步触发 `stop`。
    pub async fn register(&self) -> Result<()> {
        if self.inner.stop_once.is_started() {
            debug!("Application is stopping, skipping registration");
            return Ok(());
        }
        let (registry, timeout) = {
            let options = self.inner.options.read();
            (options.registry.clone(), options.runtime.registry_timeout)
        };
        let Some(registry) = registry else {
            debug!("No registry configured");
            return Ok(());
        };

        let mut state = self.inner.registry_state.lock().await;
        if *state != RegistryState::Init {
            debug!(state = ?*state, "Registration already handled");
            return Ok(());
        }
        // 等锁期间可能已经开始停止
        if self.inner.stop_once.is_started() {
            debug!("Application is stopping, skipping registration");
            return Ok(());
        }

        let instance = self.instance();
        let ctx = Context::new();
        let result = match tokio::time::timeout(timeout, registry.register(&ctx, &instance)).await {
            Ok(result) => result.map_err(|e| Error::registry(registry.name(), e)),
            Err(_) => {
                ctx.cancel();
                Err(Error::registry(
                    registry.name(),
                    format!("registration timed out after {:?}", timeout),
                ))
            }
        };

        match result {
            Ok(()) => {
                *state = RegistryState::Done;
                info!(
                    registry = %registry.name(),
                    instance_id = %instance.id,
                    endpoints = instance.endpoints.len(),
                    "✅ Service registered"
                );
                *self.inner.registered.lock() = Some(instance);
                Ok(())
            }
            Err(e) => {
                drop(state);
                error!(registry = %registry.name(), error = %e, "❌ Service registration failed, stopping");
                let this = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = this.stop().await {
                        error!(error = %e, "Stop after registration failure returned errors");
                    }
                });
                Err(e)
            }
        }
    }

    /// 从注册中心注销，只在注册成功后执行一次
    pub async fn deregister(&self) -> Result<()> {
        let registry = self.inner.options.read().registry.clone();
        let Some(registry) = registry else {
            return Ok(());
        };

        let mut state = self.inner.registry_state.lock().await;
        match *state {
            RegistryState::Init => {
                info!(registry = %registry.name(), "Service never registered, skipping deregistration");
                return Ok(());
            }
            RegistryState::Cancelled => {
                debug!(registry = %registry.name(), "Service already deregistered");
                return Ok(());
            }
            RegistryState::Done => {}
        }

        let instance = self
            .inner
            .registered
            .lock()
            .clone()
            .unwrap_or_else(|| self.instance());
        let result = registry.deregister(&Context::new(), &instance).await;
        *state = RegistryState::Cancelled;

        match result {
            Ok(()) => {
                info!(registry = %registry.name(), instance_id = %instance.id, "Service deregistered");
                Ok(())
            }
            Err(e) => Err(Error::registry(registry.name(), e)),
        }
    }

    /// 由应用配置与当前监听器构造注册实例
    pub fn instance(&self) -> Instance {
        let app = &self.inner.config.app;
        let mut instance = Instance::new(app.instance_id.clone(), app.name.clone())
            .with_namespace(app.namespace.clone())
            .with_version(app.version.clone())
            .with_location(app.region.clone(), app.zone.clone(), app.campus.clone());

        for (key, value) in &app.metadata {
            instance = instance.with_metadata(key.clone(), value.clone());
        }
        for (key, value) in &self.inner.options.read().metadata {
            instance = instance.with_metadata(key.clone(), value.clone());
        }
        for info in self.inner.server.listener_infos() {
            let mut endpoint = Endpoint::new(info.protocol, info.address);
            endpoint.attributes = info.attributes;
            instance = instance.with_endpoint(endpoint);
        }
        instance
    }
}

async fn serve_internal(server: Arc<dyn InternalServer>) -> Result<()> {
    server
        .serve()
        .await
        .map_err(|e| Error::internal(format!("{} serve failed: {:#}", server.name(), e)))
}

async fn stop_internal(server: Arc<dyn InternalServer>) -> Result<()> {
    server
        .stop()
        .await
        .map_err(|e| Error::internal(format!("{} stop failed: {:#}", server.name(), e)))
}
