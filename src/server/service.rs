//! 服务描述
//!
//! [`ServiceDesc`] 在注册时把强类型处理器与编解码器绑定到具体实现上，
//! 之后分发器只看到类型擦除的 [`ServiceEntry`]。

use super::stream::{ServerStream, StreamSink, Streaming};
use crate::codec::Codec;
use crate::error::Status;
use crate::interceptor::{
    AnyMessage, ServiceHandle, UnaryHandler, UnaryServerChain, UnaryServerInfo, downcast_message,
};
use crate::metadata::Context;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

type UnaryFn<S> = Arc<
    dyn Fn(
            Arc<S>,
            Context,
            Bytes,
            Arc<UnaryServerInfo>,
            UnaryServerChain,
        ) -> BoxFuture<'static, Result<Bytes, Status>>
        + Send
        + Sync,
>;

type StreamFn<S> =
    Arc<dyn Fn(Arc<S>, Arc<dyn ServerStream>) -> BoxFuture<'static, Result<(), Status>> + Send + Sync>;

/// 流式方法的处理器形态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamHandlerKind {
    ClientStream,
    ServerStream,
    Bidi,
}

impl StreamHandlerKind {
    fn from_flags(client_streams: bool, server_streams: bool) -> Self {
        match (client_streams, server_streams) {
            (true, false) => StreamHandlerKind::ClientStream,
            (false, true) => StreamHandlerKind::ServerStream,
            _ => StreamHandlerKind::Bidi,
        }
    }
}

/// 一元方法描述
pub struct MethodDesc<S: ?Sized> {
    name: String,
    handler: UnaryFn<S>,
}

impl<S> MethodDesc<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    /// 一元方法：请求经编解码器解码后进入拦截器链，响应出链后编码
    pub fn unary<Req, Resp, C, F, Fut>(name: impl Into<String>, codec: C, f: F) -> Self
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        C: Codec<Req> + Codec<Resp>,
        F: Fn(Arc<S>, Context, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let codec = Arc::new(codec);
        let f = Arc::new(f);
        let handler: UnaryFn<S> = Arc::new(move |svc, ctx, payload, info, chain| {
            let codec = Arc::clone(&codec);
            let f = Arc::clone(&f);
            Box::pin(async move {
                let req = <C as Codec<Req>>::decode(&codec, payload)?;
                let terminal = UnaryHandler::new(move |ctx, msg: AnyMessage| {
                    let f = Arc::clone(&f);
                    let svc = Arc::clone(&svc);
                    async move {
                        let req = downcast_message::<Req>(msg)?;
                        let resp = f(svc, ctx, req).await?;
                        Ok(Box::new(resp) as AnyMessage)
                    }
                });
                let reply = chain.call(ctx, Box::new(req), info, terminal).await?;
                let resp = downcast_message::<Resp>(reply)?;
                <C as Codec<Resp>>::encode(&codec, &resp)
            })
        });
        Self {
            name: name.into(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// 流式方法描述
pub struct StreamDesc<S: ?Sized> {
    name: String,
    client_streams: bool,
    server_streams: bool,
    kind: StreamHandlerKind,
    handler: StreamFn<S>,
}

impl<S> StreamDesc<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    /// 客户端流：读取全部请求后返回单个响应
    pub fn client_streaming<Req, Resp, C, F, Fut>(name: impl Into<String>, codec: C, f: F) -> Self
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        C: Codec<Req> + Codec<Resp>,
        F: Fn(Arc<S>, Streaming<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp, Status>> + Send + 'static,
    {
        let codec = Arc::new(codec);
        let f = Arc::new(f);
        let handler: StreamFn<S> = Arc::new(move |svc, stream| {
            let codec = Arc::clone(&codec);
            let f = Arc::clone(&f);
            Box::pin(async move {
                let input = Streaming::new(Arc::clone(&stream), codec.clone() as Arc<dyn Codec<Req>>);
                let resp = f(svc, input).await?;
                let buf = <C as Codec<Resp>>::encode(&codec, &resp)?;
                stream.send_msg(buf).await
            })
        });
        Self::with_handler(name, true, false, StreamHandlerKind::ClientStream, handler)
    }

    /// 服务端流：读取单个请求后持续写出响应
    pub fn server_streaming<Req, Resp, C, F, Fut>(name: impl Into<String>, codec: C, f: F) -> Self
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        C: Codec<Req> + Codec<Resp>,
        F: Fn(Arc<S>, Req, StreamSink<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let codec = Arc::new(codec);
        let f = Arc::new(f);
        let handler: StreamFn<S> = Arc::new(move |svc, stream| {
            let codec = Arc::clone(&codec);
            let f = Arc::clone(&f);
            Box::pin(async move {
                let buf = stream
                    .recv_msg()
                    .await?
                    .ok_or_else(|| Status::invalid_argument("missing request message"))?;
                let req = <C as Codec<Req>>::decode(&codec, buf)?;
                let sink = StreamSink::new(stream, codec as Arc<dyn Codec<Resp>>);
                f(svc, req, sink).await
            })
        });
        Self::with_handler(name, false, true, StreamHandlerKind::ServerStream, handler)
    }

    /// 双向流
    pub fn bidi_streaming<Req, Resp, C, F, Fut>(name: impl Into<String>, codec: C, f: F) -> Self
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        C: Codec<Req> + Codec<Resp>,
        F: Fn(Arc<S>, Streaming<Req>, StreamSink<Resp>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let codec = Arc::new(codec);
        let f = Arc::new(f);
        let handler: StreamFn<S> = Arc::new(move |svc, stream| {
            let input = Streaming::new(Arc::clone(&stream), codec.clone() as Arc<dyn Codec<Req>>);
            let sink = StreamSink::new(stream, codec.clone() as Arc<dyn Codec<Resp>>);
            Box::pin(f(svc, input, sink))
        });
        Self::with_handler(name, true, true, StreamHandlerKind::Bidi, handler)
    }

    /// 直接操作 [`ServerStream`] 的流式方法
    pub fn raw<F, Fut>(name: impl Into<String>, client_streams: bool, server_streams: bool, f: F) -> Self
    where
        F: Fn(Arc<S>, Arc<dyn ServerStream>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Status>> + Send + 'static,
    {
        let handler: StreamFn<S> = Arc::new(move |svc, stream| Box::pin(f(svc, stream)));
        let kind = StreamHandlerKind::from_flags(client_streams, server_streams);
        Self::with_handler(name, client_streams, server_streams, kind, handler)
    }

    fn with_handler(
        name: impl Into<String>,
        client_streams: bool,
        server_streams: bool,
        kind: StreamHandlerKind,
        handler: StreamFn<S>,
    ) -> Self {
        Self {
            name: name.into(),
            client_streams,
            server_streams,
            kind,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StreamHandlerKind {
        self.kind
    }
}

/// 服务描述
///
/// `S` 为服务实现类型，可以是具体类型，也可以是 `dyn Trait`。
pub struct ServiceDesc<S: ?Sized> {
    service_name: String,
    methods: Vec<MethodDesc<S>>,
    streams: Vec<StreamDesc<S>>,
    metadata: String,
}

impl<S> ServiceDesc<S>
where
    S: ?Sized + Send + Sync + 'static,
{
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            methods: Vec::new(),
            streams: Vec::new(),
            metadata: String::new(),
        }
    }

    pub fn method(mut self, method: MethodDesc<S>) -> Self {
        self.methods.push(method);
        self
    }

    pub fn stream(mut self, stream: StreamDesc<S>) -> Self {
        self.streams.push(stream);
        self
    }

    /// 描述来源（通常是 proto 文件名）
    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// 绑定服务实现，生成分发器使用的服务条目
    ///
    /// 拦截器看到的服务句柄可以下转型为 `Arc<S>`。
    pub(crate) fn bind(self, imp: Arc<S>) -> ServiceEntry {
        let server: ServiceHandle = Arc::new(Arc::clone(&imp));

        let methods = self
            .methods
            .into_iter()
            .map(|desc| {
                let imp = Arc::clone(&imp);
                let handler = desc.handler;
                let bound: BoundUnary = Arc::new(move |ctx, payload, info, chain| {
                    handler(Arc::clone(&imp), ctx, payload, info, chain)
                });
                (desc.name, bound)
            })
            .collect();

        let streams = self
            .streams
            .into_iter()
            .map(|desc| {
                let imp = Arc::clone(&imp);
                let handler = desc.handler;
                let bound: BoundStream =
                    Arc::new(move |stream| handler(Arc::clone(&imp), stream));
                let method = StreamMethod {
                    client_streams: desc.client_streams,
                    server_streams: desc.server_streams,
                    kind: desc.kind,
                    handler: bound,
                };
                (desc.name, method)
            })
            .collect();

        ServiceEntry {
            name: self.service_name,
            metadata: self.metadata,
            server,
            methods,
            streams,
        }
    }
}

pub(crate) type BoundUnary = Arc<
    dyn Fn(Context, Bytes, Arc<UnaryServerInfo>, UnaryServerChain) -> BoxFuture<'static, Result<Bytes, Status>>
        + Send
        + Sync,
>;

pub(crate) type BoundStream =
    Arc<dyn Fn(Arc<dyn ServerStream>) -> BoxFuture<'static, Result<(), Status>> + Send + Sync>;

pub(crate) struct StreamMethod {
    pub(crate) client_streams: bool,
    pub(crate) server_streams: bool,
    pub(crate) kind: StreamHandlerKind,
    pub(crate) handler: BoundStream,
}

/// 已绑定实现的服务
pub(crate) struct ServiceEntry {
    pub(crate) name: String,
    pub(crate) metadata: String,
    pub(crate) server: ServiceHandle,
    pub(crate) methods: HashMap<String, BoundUnary>,
    pub(crate) streams: HashMap<String, StreamMethod>,
}

impl ServiceEntry {
    pub(crate) fn info(&self) -> ServiceInfo {
        let mut methods: Vec<String> = self.methods.keys().cloned().collect();
        methods.sort();

        let mut streams: Vec<StreamInfo> = self
            .streams
            .iter()
            .map(|(name, m)| StreamInfo {
                name: name.clone(),
                client_streams: m.client_streams,
                server_streams: m.server_streams,
                kind: m.kind,
            })
            .collect();
        streams.sort_by(|a, b| a.name.cmp(&b.name));

        ServiceInfo {
            name: self.name.clone(),
            metadata: self.metadata.clone(),
            methods,
            streams,
        }
    }
}

/// 服务内省信息
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub metadata: String,
    pub methods: Vec<String>,
    pub streams: Vec<StreamInfo>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StreamInfo {
    pub name: String,
    pub client_streams: bool,
    pub server_streams: bool,
    pub kind: StreamHandlerKind,
}
