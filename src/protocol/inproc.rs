//! 进程内协议
//!
//! 监听器把自己的地址登记到共享的 [`InProcNetwork`]，客户端通过 `dial` 拿到
//! [`InProcChannel`]。请求与响应都走 `tokio::sync::mpsc`，支持一元与全部流式模式。

use super::{Builder, Listener, ListenerInfo, ProtocolConfig};
use crate::client::{ClientStream, ClientTransport, UnaryResponse};
use crate::error::{Error, Result, Status};
use crate::metadata::{Context, Metadata};
use crate::server::{MethodHandle, ServerStream};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const PROTOCOL_NAME: &str = "inproc";

/// 等待监听器接收的调用数
const CALL_BACKLOG: usize = 128;
/// 单个流每个方向缓冲的消息数
const MESSAGE_BUFFER: usize = 32;

struct InProcCall {
    method: String,
    metadata: Metadata,
    client_streams: bool,
    server_streams: bool,
    requests: mpsc::Receiver<Bytes>,
    events: mpsc::Sender<ServerEvent>,
}

enum ServerEvent {
    Header(Metadata),
    Message(Bytes),
    Finish {
        trailer: Metadata,
        result: std::result::Result<Option<Bytes>, Status>,
    },
}

/// 进程内网络：地址到监听器的映射
#[derive(Clone, Default)]
pub struct InProcNetwork {
    endpoints: Arc<RwLock<HashMap<String, mpsc::Sender<InProcCall>>>>,
}

impl InProcNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// 连接到指定地址的监听器
    pub fn dial(&self, address: &str) -> std::result::Result<InProcChannel, Status> {
        let sender = self
            .endpoints
            .read()
            .get(address)
            .cloned()
            .ok_or_else(|| Status::unavailable(format!("no inproc listener at {}", address)))?;
        Ok(InProcChannel {
            address: address.to_string(),
            sender,
        })
    }

    /// 当前登记的地址
    pub fn addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = self.endpoints.read().keys().cloned().collect();
        addresses.sort();
        addresses
    }

    fn bind(&self, address: &str, sender: mpsc::Sender<InProcCall>) -> Result<()> {
        let mut endpoints = self.endpoints.write();
        if endpoints.contains_key(address) {
            return Err(Error::protocol(
                PROTOCOL_NAME,
                address,
                "address already in use",
            ));
        }
        endpoints.insert(address.to_string(), sender);
        Ok(())
    }

    fn unbind(&self, address: &str) {
        self.endpoints.write().remove(address);
    }
}

/// 进程内协议构建器
#[derive(Clone, Default)]
pub struct InProcBuilder {
    network: InProcNetwork,
}

impl InProcBuilder {
    pub fn new(network: InProcNetwork) -> Self {
        Self { network }
    }
}

impl Builder for InProcBuilder {
    fn name(&self) -> &str {
        PROTOCOL_NAME
    }

    fn build(&self, config: &ProtocolConfig, handle: MethodHandle) -> Result<Arc<dyn Listener>> {
        Ok(Arc::new(InProcListener {
            address: config.address.clone(),
            attributes: config.attributes.clone(),
            network: self.network.clone(),
            handle,
            incoming: tokio::sync::Mutex::new(None),
            shutdown: CancellationToken::new(),
        }))
    }
}

struct InProcListener {
    address: String,
    attributes: HashMap<String, String>,
    network: InProcNetwork,
    handle: MethodHandle,
    incoming: tokio::sync::Mutex<Option<mpsc::Receiver<InProcCall>>>,
    shutdown: CancellationToken,
}

#[async_trait]
impl Listener for InProcListener {
    async fn start(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel(CALL_BACKLOG);
        self.network.bind(&self.address, tx)?;
        *self.incoming.lock().await = Some(rx);
        Ok(())
    }

    async fn handle(&self) -> Result<()> {
        let Some(mut incoming) = self.incoming.lock().await.take() else {
            return Err(Error::protocol(
                PROTOCOL_NAME,
                &self.address,
                "listener not started",
            ));
        };

        let mut calls = JoinSet::new();
        loop {
            while calls.try_join_next().is_some() {}

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                call = incoming.recv() => match call {
                    Some(call) => {
                        let handle = self.handle.clone();
                        calls.spawn(async move {
                            handle.handle(Arc::new(InProcServerStream::new(call))).await;
                        });
                    }
                    None => break,
                },
            }
        }
        drop(incoming);

        let in_flight = calls.len();
        if in_flight > 0 {
            debug!(address = %self.address, in_flight, "Draining inproc calls");
        }
        while calls.join_next().await.is_some() {}
        info!(address = %self.address, "Inproc listener stopped");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.network.unbind(&self.address);
        self.shutdown.cancel();
        Ok(())
    }

    fn info(&self) -> ListenerInfo {
        ListenerInfo {
            protocol: PROTOCOL_NAME.to_string(),
            address: self.address.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

struct InProcServerStream {
    ctx: Context,
    method: String,
    client_streams: bool,
    server_streams: bool,
    requests: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    events: mpsc::Sender<ServerEvent>,
    header: Mutex<Metadata>,
    header_sent: AtomicBool,
    trailer: Mutex<Metadata>,
    finished: AtomicBool,
}

impl InProcServerStream {
    fn new(call: InProcCall) -> Self {
        Self {
            ctx: Context::new().with_inbound(call.metadata),
            method: call.method,
            client_streams: call.client_streams,
            server_streams: call.server_streams,
            requests: tokio::sync::Mutex::new(call.requests),
            events: call.events,
            header: Mutex::new(Metadata::new()),
            header_sent: AtomicBool::new(false),
            trailer: Mutex::new(Metadata::new()),
            finished: AtomicBool::new(false),
        }
    }

    /// header 只发送一次
    fn take_header(&self) -> Option<Metadata> {
        if self.header_sent.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(std::mem::take(&mut *self.header.lock()))
    }

    async fn flush_header(&self) {
        if let Some(header) = self.take_header() {
            let _ = self.events.send(ServerEvent::Header(header)).await;
        }
    }
}

#[async_trait]
impl ServerStream for InProcServerStream {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn method(&self) -> &str {
        &self.method
    }

    async fn start(
        &self,
        client_streaming: bool,
        server_streaming: bool,
    ) -> std::result::Result<(), Status> {
        if client_streaming != self.client_streams || server_streaming != self.server_streams {
            return Err(Status::internal(format!(
                "stream mode mismatch for {}",
                self.method
            )));
        }
        Ok(())
    }

    async fn recv_msg(&self) -> std::result::Result<Option<Bytes>, Status> {
        Ok(self.requests.lock().await.recv().await)
    }

    async fn send_msg(&self, msg: Bytes) -> std::result::Result<(), Status> {
        self.flush_header().await;
        self.events
            .send(ServerEvent::Message(msg))
            .await
            .map_err(|_| Status::unavailable("client went away"))
    }

    fn set_header(&self, md: Metadata) -> std::result::Result<(), Status> {
        if self.header_sent.load(Ordering::Acquire) {
            return Err(Status::internal("header already sent"));
        }
        self.header.lock().merge(&md);
        Ok(())
    }

    fn set_trailer(&self, md: Metadata) {
        self.trailer.lock().merge(&md);
    }

    async fn finish(&self, result: std::result::Result<Option<Bytes>, Status>) {
        if self.finished.swap(true, Ordering::AcqRel) {
            return;
        }
        self.flush_header().await;
        let trailer = std::mem::take(&mut *self.trailer.lock());
        let _ = self
            .events
            .send(ServerEvent::Finish { trailer, result })
            .await;
    }
}

/// 到进程内监听器的客户端连接
#[derive(Clone)]
pub struct InProcChannel {
    address: String,
    sender: mpsc::Sender<InProcCall>,
}

impl InProcChannel {
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn open(
        &self,
        ctx: &Context,
        method: &str,
        client_streams: bool,
        server_streams: bool,
    ) -> std::result::Result<InProcClientStream, Status> {
        let (req_tx, req_rx) = mpsc::channel(MESSAGE_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(MESSAGE_BUFFER);
        let call = InProcCall {
            method: method.to_string(),
            metadata: ctx.outbound().unwrap_or_default(),
            client_streams,
            server_streams,
            requests: req_rx,
            events: event_tx,
        };
        self.sender.send(call).await.map_err(|_| {
            Status::unavailable(format!("inproc listener at {} is closed", self.address))
        })?;
        Ok(InProcClientStream {
            requests: Mutex::new(Some(req_tx)),
            events: tokio::sync::Mutex::new(event_rx),
            header: Mutex::new(None),
            trailer: Mutex::new(None),
            done: AtomicBool::new(false),
        })
    }

    async fn unary(
        &self,
        ctx: &Context,
        method: &str,
        req: Bytes,
    ) -> std::result::Result<UnaryResponse, Status> {
        let stream = self.open(ctx, method, false, false).await?;
        let sent = match stream.send_msg(req).await {
            Ok(()) => stream.close_send().await,
            Err(status) => Err(status),
        };
        if let Err(status) = sent {
            // 服务端可能已经结束调用，优先返回它的终止状态
            return match stream.recv_msg().await {
                Err(terminal) => Err(terminal),
                Ok(_) => Err(status),
            };
        }
        let body = stream
            .recv_msg()
            .await?
            .ok_or_else(|| Status::internal("server finished without a reply"))?;
        Ok(UnaryResponse {
            header: stream.header().unwrap_or_default(),
            trailer: stream.trailer().unwrap_or_default(),
            body,
        })
    }
}

#[async_trait]
impl ClientTransport for InProcChannel {
    async fn invoke(
        &self,
        ctx: &Context,
        method: &str,
        req: Bytes,
    ) -> std::result::Result<UnaryResponse, Status> {
        tokio::select! {
            result = self.unary(ctx, method, req) => result,
            _ = ctx.cancelled() => Err(Status::cancelled("context cancelled")),
        }
    }

    async fn new_stream(
        &self,
        ctx: &Context,
        method: &str,
        client_streams: bool,
        server_streams: bool,
    ) -> std::result::Result<Box<dyn ClientStream>, Status> {
        let stream = self
            .open(ctx, method, client_streams, server_streams)
            .await?;
        Ok(Box::new(stream))
    }
}

struct InProcClientStream {
    requests: Mutex<Option<mpsc::Sender<Bytes>>>,
    events: tokio::sync::Mutex<mpsc::Receiver<ServerEvent>>,
    header: Mutex<Option<Metadata>>,
    trailer: Mutex<Option<Metadata>>,
    done: AtomicBool,
}

#[async_trait]
impl ClientStream for InProcClientStream {
    async fn send_msg(&self, msg: Bytes) -> std::result::Result<(), Status> {
        let sender = self
            .requests
            .lock()
            .clone()
            .ok_or_else(|| Status::failed_precondition("send after close_send"))?;
        sender
            .send(msg)
            .await
            .map_err(|_| Status::unavailable("server closed the stream"))
    }

    async fn close_send(&self) -> std::result::Result<(), Status> {
        self.requests.lock().take();
        Ok(())
    }

    async fn recv_msg(&self) -> std::result::Result<Option<Bytes>, Status> {
        if self.done.load(Ordering::Acquire) {
            return Ok(None);
        }

        let mut events = self.events.lock().await;
        loop {
            match events.recv().await {
                Some(ServerEvent::Header(md)) => {
                    *self.header.lock() = Some(md);
                }
                Some(ServerEvent::Message(msg)) => return Ok(Some(msg)),
                Some(ServerEvent::Finish { trailer, result }) => {
                    self.header.lock().get_or_insert_with(Metadata::new);
                    *self.trailer.lock() = Some(trailer);
                    self.done.store(true, Ordering::Release);
                    return result;
                }
                None => {
                    self.done.store(true, Ordering::Release);
                    return Err(Status::unavailable("stream closed without status"));
                }
            }
        }
    }

    fn header(&self) -> Option<Metadata> {
        self.header.lock().clone()
    }

    fn trailer(&self) -> Option<Metadata> {
        self.trailer.lock().clone()
    }
}
