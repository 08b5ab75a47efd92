//! 服务端流抽象
//!
//! 协议层为每次调用创建一个 [`ServerStream`]，分发器通过它读取请求、写出响应、
//! 下发 header / trailer，并在调用结束时恰好调用一次 `finish`。

use crate::codec::Codec;
use crate::error::Status;
use crate::metadata::{Context, Metadata};
use crate::stats::{HandlerChain, RpcStats, StatsHandler};
use async_trait::async_trait;
use bytes::Bytes;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// 协议层实现的服务端流
#[async_trait]
pub trait ServerStream: Send + Sync + 'static {
    /// 流上下文，携带入站元数据
    fn context(&self) -> &Context;

    /// 完整方法名，如 `/helloworld.Greeter/SayHello`
    fn method(&self) -> &str;

    /// 与传输层协商流模式，传输层不支持时返回错误
    async fn start(&self, client_streaming: bool, server_streaming: bool) -> Result<(), Status>;

    /// 读取下一条消息，`None` 表示输入结束
    async fn recv_msg(&self) -> Result<Option<Bytes>, Status>;

    async fn send_msg(&self, msg: Bytes) -> Result<(), Status>;

    /// 合并写入 header，header 已发送时返回错误
    fn set_header(&self, md: Metadata) -> Result<(), Status>;

    fn set_trailer(&self, md: Metadata);

    /// 结束调用，一元调用的响应通过 `Ok(Some(..))` 携带
    async fn finish(&self, result: Result<Option<Bytes>, Status>);
}

/// 调用期间交给拦截器和处理器的流
///
/// 上下文替换为调用级子上下文，收发时上报统计事件；
/// `finish` 由分发器负责，这里调用不生效。
pub(crate) struct CallStream {
    inner: Arc<dyn ServerStream>,
    ctx: Context,
    stats: Arc<HandlerChain>,
}

impl CallStream {
    pub(crate) fn new(inner: Arc<dyn ServerStream>, ctx: Context, stats: Arc<HandlerChain>) -> Self {
        Self { inner, ctx, stats }
    }
}

#[async_trait]
impl ServerStream for CallStream {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn method(&self) -> &str {
        self.inner.method()
    }

    async fn start(&self, client_streaming: bool, server_streaming: bool) -> Result<(), Status> {
        self.inner.start(client_streaming, server_streaming).await
    }

    async fn recv_msg(&self) -> Result<Option<Bytes>, Status> {
        let msg = self.inner.recv_msg().await?;
        if let Some(msg) = &msg {
            self.stats
                .handle_rpc(&self.ctx, &RpcStats::InPayload { length: msg.len() });
        }
        Ok(msg)
    }

    async fn send_msg(&self, msg: Bytes) -> Result<(), Status> {
        let length = msg.len();
        self.inner.send_msg(msg).await?;
        self.stats
            .handle_rpc(&self.ctx, &RpcStats::OutPayload { length });
        Ok(())
    }

    fn set_header(&self, md: Metadata) -> Result<(), Status> {
        self.inner.set_header(md.clone())?;
        self.stats
            .handle_rpc(&self.ctx, &RpcStats::OutHeader { header: md });
        Ok(())
    }

    fn set_trailer(&self, md: Metadata) {
        self.inner.set_trailer(md.clone());
        self.stats
            .handle_rpc(&self.ctx, &RpcStats::OutTrailer { trailer: md });
    }

    async fn finish(&self, _result: Result<Option<Bytes>, Status>) {
        debug!(method = %self.inner.method(), "finish is owned by the dispatcher, ignored");
    }
}

/// 强类型入站消息流
pub struct Streaming<T> {
    stream: Arc<dyn ServerStream>,
    codec: Arc<dyn Codec<T>>,
}

impl<T: 'static> Streaming<T> {
    pub fn new(stream: Arc<dyn ServerStream>, codec: Arc<dyn Codec<T>>) -> Self {
        Self { stream, codec }
    }

    /// 读取并解码下一条消息
    pub async fn message(&mut self) -> Result<Option<T>, Status> {
        match self.stream.recv_msg().await? {
            Some(buf) => self.codec.decode(buf).map(Some),
            None => Ok(None),
        }
    }

    pub fn context(&self) -> &Context {
        self.stream.context()
    }
}

/// 强类型出站消息流
pub struct StreamSink<T> {
    stream: Arc<dyn ServerStream>,
    codec: Arc<dyn Codec<T>>,
    _marker: PhantomData<fn(T)>,
}

impl<T: 'static> StreamSink<T> {
    pub fn new(stream: Arc<dyn ServerStream>, codec: Arc<dyn Codec<T>>) -> Self {
        Self {
            stream,
            codec,
            _marker: PhantomData,
        }
    }

    pub async fn send(&self, item: &T) -> Result<(), Status> {
        let buf = self.codec.encode(item)?;
        self.stream.send_msg(buf).await
    }

    pub fn set_header(&self, md: Metadata) -> Result<(), Status> {
        self.stream.set_header(md)
    }

    pub fn set_trailer(&self, md: Metadata) {
        self.stream.set_trailer(md)
    }

    pub fn context(&self) -> &Context {
        self.stream.context()
    }
}
