//! RPC 客户端
//!
//! [`Client`] 在 [`ClientTransport`] 之上组合客户端拦截器链与统计处理器；
//! 传输层只处理字节与元数据，编解码在这里完成。

use crate::codec::Codec;
use crate::config::ClientConfig;
use crate::error::Status;
use crate::interceptor::{
    AnyMessage, StreamClientChain, Streamer, UnaryClientChain, UnaryInvoker, downcast_message,
};
use crate::metadata::{Context, Metadata};
use crate::plugin::Plugins;
use crate::stats::{HandlerChain, RpcStats, RpcTagInfo, StatsHandler};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// 客户端选项
pub type ClientOptions = ClientConfig;

/// 客户端流描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientStreamDesc {
    pub stream_name: String,
    pub client_streams: bool,
    pub server_streams: bool,
}

impl ClientStreamDesc {
    pub fn new(stream_name: impl Into<String>, client_streams: bool, server_streams: bool) -> Self {
        Self {
            stream_name: stream_name.into(),
            client_streams,
            server_streams,
        }
    }
}

/// 一元调用的原始响应
#[derive(Debug, Clone, Default)]
pub struct UnaryResponse {
    pub header: Metadata,
    pub trailer: Metadata,
    pub body: Bytes,
}

/// 客户端流
#[async_trait]
pub trait ClientStream: Send + Sync {
    async fn send_msg(&self, msg: Bytes) -> Result<(), Status>;

    /// 关闭发送方向
    async fn close_send(&self) -> Result<(), Status>;

    /// 读取下一条消息，`None` 表示服务端正常结束
    async fn recv_msg(&self) -> Result<Option<Bytes>, Status>;

    /// 服务端 header，收到第一条消息或结束之后可用
    fn header(&self) -> Option<Metadata>;

    /// 服务端 trailer，流结束之后可用
    fn trailer(&self) -> Option<Metadata>;
}

/// 客户端传输层
#[async_trait]
pub trait ClientTransport: Send + Sync + 'static {
    /// 一元调用，上下文的出站元数据作为请求元数据发送
    async fn invoke(&self, ctx: &Context, method: &str, req: Bytes) -> Result<UnaryResponse, Status>;

    async fn new_stream(
        &self,
        ctx: &Context,
        method: &str,
        client_streams: bool,
        server_streams: bool,
    ) -> Result<Box<dyn ClientStream>, Status>;
}

/// RPC 客户端
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn ClientTransport>,
    unary_chain: UnaryClientChain,
    stream_chain: StreamClientChain,
    stats: Arc<HandlerChain>,
}

impl Client {
    pub fn new(transport: Arc<dyn ClientTransport>, options: &ClientOptions, plugins: &Plugins) -> Self {
        let interceptors = &plugins.interceptors;
        Self {
            transport,
            unary_chain: interceptors.build_unary_client_chain(&options.unary_interceptors),
            stream_chain: interceptors.build_stream_client_chain(&options.stream_interceptors),
            stats: plugins.stats.handler(false, &options.stats_handlers),
        }
    }

    /// 一元调用
    ///
    /// 上下文携带 [`CallScope`](crate::metadata::CallScope) 时，收到的 header / trailer 会合并进去。
    pub async fn invoke<Req, Resp, C>(
        &self,
        ctx: &Context,
        method: &str,
        req: Req,
        codec: C,
    ) -> Result<Resp, Status>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        C: Codec<Req> + Codec<Resp>,
    {
        let begin = Instant::now();
        let stats_ctx = self.stats.tag_rpc(
            ctx.clone(),
            &RpcTagInfo {
                full_method: method.to_string(),
                is_client: true,
            },
        );
        self.stats.handle_rpc(
            &stats_ctx,
            &RpcStats::Begin {
                is_client: true,
                client_stream: false,
                server_stream: false,
            },
        );

        let codec = Arc::new(codec);
        let transport = Arc::clone(&self.transport);
        let stats = Arc::clone(&self.stats);
        let invoker = UnaryInvoker::new(move |ctx: Context, method: String, msg: AnyMessage| {
            let codec = Arc::clone(&codec);
            let transport = Arc::clone(&transport);
            let stats = Arc::clone(&stats);
            async move {
                let req = downcast_message::<Req>(msg)?;
                let payload = <C as Codec<Req>>::encode(&codec, &req)?;
                stats.handle_rpc(&ctx, &RpcStats::OutPayload { length: payload.len() });

                let resp = transport.invoke(&ctx, &method, payload).await?;
                stats.handle_rpc(&ctx, &RpcStats::InPayload { length: resp.body.len() });
                if let Some(scope) = ctx.scope() {
                    scope.set_header(&resp.header);
                    scope.set_trailer(&resp.trailer);
                }

                let reply = <C as Codec<Resp>>::decode(&codec, resp.body)?;
                Ok(Box::new(reply) as AnyMessage)
            }
        });

        let result = self
            .unary_chain
            .call(stats_ctx.clone(), method.to_string(), Box::new(req), invoker)
            .await
            .and_then(downcast_message::<Resp>);

        self.stats.handle_rpc(
            &stats_ctx,
            &RpcStats::End {
                full_method: method.to_string(),
                elapsed: begin.elapsed(),
                error: result.as_ref().err().cloned(),
            },
        );
        result
    }

    /// 创建客户端流
    pub async fn new_stream(
        &self,
        ctx: &Context,
        desc: ClientStreamDesc,
        method: &str,
    ) -> Result<Box<dyn ClientStream>, Status> {
        let stats_ctx = self.stats.tag_rpc(
            ctx.clone(),
            &RpcTagInfo {
                full_method: method.to_string(),
                is_client: true,
            },
        );
        self.stats.handle_rpc(
            &stats_ctx,
            &RpcStats::Begin {
                is_client: true,
                client_stream: desc.client_streams,
                server_stream: desc.server_streams,
            },
        );

        let transport = Arc::clone(&self.transport);
        let streamer = Streamer::new(move |ctx: Context, desc: Arc<ClientStreamDesc>, method: String| {
            let transport = Arc::clone(&transport);
            async move {
                transport
                    .new_stream(&ctx, &method, desc.client_streams, desc.server_streams)
                    .await
            }
        });

        let begin = Instant::now();
        let result = self
            .stream_chain
            .call(stats_ctx.clone(), Arc::new(desc), method.to_string(), streamer)
            .await;

        match result {
            Ok(inner) => Ok(Box::new(StatsClientStream {
                inner,
                ctx: stats_ctx,
                stats: Arc::clone(&self.stats),
                full_method: method.to_string(),
                begin,
                ended: Mutex::new(false),
            })),
            Err(status) => {
                self.stats.handle_rpc(
                    &stats_ctx,
                    &RpcStats::End {
                        full_method: method.to_string(),
                        elapsed: begin.elapsed(),
                        error: Some(status.clone()),
                    },
                );
                Err(status)
            }
        }
    }
}

/// 上报收发与结束事件的客户端流
struct StatsClientStream {
    inner: Box<dyn ClientStream>,
    ctx: Context,
    stats: Arc<HandlerChain>,
    full_method: String,
    begin: Instant,
    ended: Mutex<bool>,
}

impl StatsClientStream {
    fn end(&self, error: Option<Status>) {
        let mut ended = self.ended.lock();
        if *ended {
            return;
        }
        *ended = true;
        self.stats.handle_rpc(
            &self.ctx,
            &RpcStats::End {
                full_method: self.full_method.clone(),
                elapsed: self.begin.elapsed(),
                error,
            },
        );
    }
}

#[async_trait]
impl ClientStream for StatsClientStream {
    async fn send_msg(&self, msg: Bytes) -> Result<(), Status> {
        let length = msg.len();
        self.inner.send_msg(msg).await?;
        self.stats
            .handle_rpc(&self.ctx, &RpcStats::OutPayload { length });
        Ok(())
    }

    async fn close_send(&self) -> Result<(), Status> {
        self.inner.close_send().await
    }

    async fn recv_msg(&self) -> Result<Option<Bytes>, Status> {
        match self.inner.recv_msg().await {
            Ok(Some(msg)) => {
                self.stats
                    .handle_rpc(&self.ctx, &RpcStats::InPayload { length: msg.len() });
                Ok(Some(msg))
            }
            Ok(None) => {
                self.end(None);
                Ok(None)
            }
            Err(status) => {
                self.end(Some(status.clone()));
                Err(status)
            }
        }
    }

    fn header(&self) -> Option<Metadata> {
        self.inner.header()
    }

    fn trailer(&self) -> Option<Metadata> {
        self.inner.trailer()
    }
}
