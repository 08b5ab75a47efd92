//! 多协议服务端
//!
//! 一个 [`Server`] 持有注册的服务表，`serve` 时按配置为每个协议构建监听器，
//! 所有监听器共享同一个 [`Dispatcher`]。

pub mod dispatch;
pub mod service;
pub mod stream;

pub use dispatch::{Dispatcher, MethodHandle, parse_method};
pub use service::{MethodDesc, ServiceDesc, ServiceInfo, StreamDesc, StreamHandlerKind, StreamInfo};
pub use stream::{ServerStream, StreamSink, Streaming};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::metadata::Context;
use crate::plugin::Plugins;
use crate::protocol::{Listener, ListenerInfo};
use crate::stats::{ChannelStats, ChannelTagInfo, StatsHandler};
use parking_lot::{Mutex, RwLock};
use service::ServiceEntry;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// 服务端选项
pub type ServerOptions = ServerConfig;

/// 服务端状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerState {
    Init = 0,
    Running = 1,
    Closing = 2,
}

impl ServerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ServerState::Init,
            1 => ServerState::Running,
            _ => ServerState::Closing,
        }
    }
}

/// 多协议服务端
pub struct Server {
    options: ServerOptions,
    plugins: Arc<Plugins>,
    state: AtomicU8,
    services: RwLock<HashMap<String, Arc<ServiceEntry>>>,
    listeners: Mutex<Vec<Arc<dyn Listener>>>,
}

impl Server {
    pub fn new(options: ServerOptions, plugins: Arc<Plugins>) -> Self {
        Self {
            options,
            plugins,
            state: AtomicU8::new(ServerState::Init as u8),
            services: RwLock::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn state(&self) -> ServerState {
        ServerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// 注册服务
    ///
    /// 同名服务重复注册返回 [`Error::DuplicateService`]；`serve` 之后注册返回
    /// [`Error::ServerStarted`]。
    pub fn register_service<S>(&self, desc: ServiceDesc<S>, imp: Arc<S>) -> Result<()>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        let name = desc.service_name().to_string();
        if self.state() != ServerState::Init {
            return Err(Error::ServerStarted(name));
        }

        let mut services = self.services.write();
        if services.contains_key(&name) {
            return Err(Error::DuplicateService(name));
        }

        let entry = desc.bind(imp);
        info!(
            service = %name,
            methods = entry.methods.len(),
            streams = entry.streams.len(),
            "Service registered"
        );
        services.insert(name, Arc::new(entry));
        Ok(())
    }

    /// 已注册服务的内省信息，按名称排序
    pub fn service_infos(&self) -> Vec<ServiceInfo> {
        let mut infos: Vec<ServiceInfo> = self.services.read().values().map(|e| e.info()).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// 当前活跃监听器的信息
    pub fn listener_infos(&self) -> Vec<ListenerInfo> {
        self.listeners.lock().iter().map(|l| l.info()).collect()
    }

    /// 启动所有协议监听器并阻塞到全部退出
    ///
    /// 全部监听器启动成功后通过 `ready` 通知调用方；启动失败时 `ready` 被丢弃，
    /// 已启动的监听器会被停止。
    pub async fn serve(&self, ready: oneshot::Sender<()>) -> Result<()> {
        if self
            .state
            .compare_exchange(
                ServerState::Init as u8,
                ServerState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(match self.state() {
                ServerState::Closing => Error::ServerClosed,
                _ => Error::ServerStarted("serve called twice".to_string()),
            });
        }

        let dispatcher = self.dispatcher();
        let listeners = self.start_listeners(&dispatcher).await?;

        let accepted = {
            let mut slot = self.listeners.lock();
            let running = self.state() == ServerState::Running;
            if running {
                slot.extend(listeners.iter().cloned());
            }
            running
        };
        if !accepted {
            warn!("Server stopped while starting, closing listeners");
            stop_all(&listeners).await;
            return Ok(());
        }

        let stats = self
            .plugins
            .stats
            .handler(true, &self.options.stats_handlers);
        for listener in &listeners {
            let info = listener.info();
            let ctx = stats.tag_channel(Context::new(), &ChannelTagInfo { info: info.clone() });
            stats.handle_channel(&ctx, &ChannelStats::Begin { info });
        }

        info!(
            listeners = listeners.len(),
            services = dispatcher.service_count(),
            "🚀 Server is serving"
        );
        let _ = ready.send(());

        let mut set = JoinSet::new();
        for listener in listeners {
            set.spawn(async move {
                let result = listener.handle().await;
                (listener.info(), result)
            });
        }

        let mut errors = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((info, result)) => {
                    let error = result.as_ref().err().map(|e| e.to_string());
                    let ctx = stats.tag_channel(Context::new(), &ChannelTagInfo { info: info.clone() });
                    stats.handle_channel(&ctx, &ChannelStats::End { info, error });
                    if let Err(e) = result {
                        errors.push(e);
                    }
                }
                Err(e) => errors.push(Error::internal(format!("listener task failed: {}", e))),
            }
        }

        info!("Server stopped serving");
        match Error::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// 停止所有监听器，重复调用直接返回
    pub async fn stop(&self) -> Result<()> {
        let previous = self.state.swap(ServerState::Closing as u8, Ordering::AcqRel);
        if previous == ServerState::Closing as u8 {
            return Ok(());
        }

        let listeners = std::mem::take(&mut *self.listeners.lock());
        info!(listeners = listeners.len(), "Stopping server");
        let errors = stop_all(&listeners).await;
        match Error::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn dispatcher(&self) -> Dispatcher {
        let services = self.services.read().clone();
        let interceptors = &self.plugins.interceptors;
        Dispatcher::new(
            services,
            interceptors.build_unary_server_chain(&self.options.unary_interceptors),
            interceptors.build_stream_server_chain(&self.options.stream_interceptors),
            self.plugins.stats.handler(true, &self.options.stats_handlers),
        )
    }

    async fn start_listeners(&self, dispatcher: &Dispatcher) -> Result<Vec<Arc<dyn Listener>>> {
        let mut started: Vec<Arc<dyn Listener>> = Vec::new();
        for config in &self.options.protocols {
            let listener = match self.plugins.protocols.resolve(&config.name) {
                Some(builder) => builder.build(config, dispatcher.clone()),
                None => Err(Error::ProtocolNotFound(config.name.clone())),
            };
            let result = match listener {
                Ok(listener) => listener.start().await.map(|_| listener),
                Err(e) => Err(e),
            };
            match result {
                Ok(listener) => {
                    let info = listener.info();
                    info!(protocol = %info.protocol, address = %info.address, "Listener started");
                    started.push(listener);
                }
                Err(e) => {
                    error!(
                        protocol = %config.name,
                        address = %config.address,
                        error = %e,
                        "❌ Failed to start listener"
                    );
                    stop_all(&started).await;
                    return Err(e);
                }
            }
        }
        Ok(started)
    }
}

async fn stop_all(listeners: &[Arc<dyn Listener>]) -> Vec<Error> {
    let results = futures::future::join_all(listeners.iter().map(|l| l.stop())).await;
    results.into_iter().filter_map(|r| r.err()).collect()
}
