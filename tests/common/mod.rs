//! 集成测试公共组件
//!
//! 提供 `helloworld.Greeter` 测试服务与进程内服务端的启动工具。

#![allow(dead_code)]

use bytes::Bytes;
use flare_rpc_core::client::{Client, ClientOptions};
use flare_rpc_core::codec::JsonCodec;
use flare_rpc_core::config::{ProtocolConfig, ServerConfig};
use flare_rpc_core::error::Status;
use flare_rpc_core::metadata::{Context, Metadata};
use flare_rpc_core::plugin::Plugins;
use flare_rpc_core::protocol::{InProcBuilder, InProcNetwork};
use flare_rpc_core::server::{MethodDesc, Server, ServiceDesc, StreamDesc, StreamSink, Streaming};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const SERVICE: &str = "helloworld.Greeter";
pub const SAY_HELLO: &str = "/helloworld.Greeter/SayHello";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub name: String,
}

impl HelloRequest {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelloReply {
    pub message: String,
}

/// 测试服务
///
/// - 空名字返回 `InvalidArgument`
/// - 名字为 `panic` 时处理器 panic
/// - 其余情况写入 header `x-greeter` 与 trailer `x-served-by`
#[derive(Default)]
pub struct Greeter {
    calls: AtomicUsize,
}

impl Greeter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn say_hello(&self, ctx: Context, req: HelloRequest) -> Result<HelloReply, Status> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if req.name.is_empty() {
            return Err(Status::invalid_argument("name is required"));
        }
        if req.name == "panic" {
            panic!("greeter exploded");
        }

        let _ = ctx.set_header(&Metadata::from_pairs([("x-greeter", "v1")]));
        let _ = ctx.set_trailer(&Metadata::from_pairs([("x-served-by", "greeter")]));
        Ok(HelloReply {
            message: format!("Hello {}", req.name),
        })
    }
}

pub fn greeter_desc() -> ServiceDesc<Greeter> {
    ServiceDesc::new(SERVICE)
        .with_metadata("helloworld.proto")
        .method(MethodDesc::unary(
            "SayHello",
            JsonCodec,
            |svc: Arc<Greeter>, ctx: Context, req: HelloRequest| async move {
                svc.say_hello(ctx, req).await
            },
        ))
        .stream(StreamDesc::client_streaming(
            "CollectNames",
            JsonCodec,
            |_svc: Arc<Greeter>, mut names: Streaming<HelloRequest>| async move {
                let mut collected = Vec::new();
                while let Some(req) = names.message().await? {
                    collected.push(req.name);
                }
                Ok(HelloReply {
                    message: format!("Hello {}", collected.join(", ")),
                })
            },
        ))
        .stream(StreamDesc::server_streaming(
            "SayHelloRepeated",
            JsonCodec,
            |_svc: Arc<Greeter>, req: HelloRequest, sink: StreamSink<HelloReply>| async move {
                for i in 0..3 {
                    sink.send(&HelloReply {
                        message: format!("Hello {} #{}", req.name, i),
                    })
                    .await?;
                }
                Ok(())
            },
        ))
        .stream(StreamDesc::bidi_streaming(
            "Chat",
            JsonCodec,
            |_svc: Arc<Greeter>, mut input: Streaming<HelloRequest>, sink: StreamSink<HelloReply>| async move {
                while let Some(req) = input.message().await? {
                    sink.send(&HelloReply {
                        message: format!("Hello {}", req.name),
                    })
                    .await?;
                }
                Ok(())
            },
        ))
}

/// 注册了进程内协议的内置插件
pub fn inproc_plugins(network: &InProcNetwork) -> Plugins {
    let plugins = Plugins::with_builtins();
    plugins.protocols.register(InProcBuilder::new(network.clone()));
    plugins
}

pub fn inproc_options(address: &str) -> ServerConfig {
    ServerConfig::default().with_protocol(ProtocolConfig::new("inproc", address))
}

/// 运行中的测试服务端
pub struct TestServer {
    pub server: Arc<Server>,
    pub greeter: Arc<Greeter>,
    pub plugins: Arc<Plugins>,
    pub serving: JoinHandle<flare_rpc_core::Result<()>>,
}

impl TestServer {
    /// 停止服务端并等待所有进行中的调用结束
    pub async fn shutdown(self) {
        self.server.stop().await.expect("Failed to stop server");
        self.serving
            .await
            .expect("Serve task panicked")
            .expect("Serve returned an error");
    }
}

/// 注册 Greeter 并启动服务端，等待就绪
pub async fn serve_greeter(options: ServerConfig, plugins: Plugins) -> TestServer {
    let plugins = Arc::new(plugins);
    let server = Arc::new(Server::new(options, Arc::clone(&plugins)));
    let greeter = Arc::new(Greeter::default());
    server
        .register_service(greeter_desc(), Arc::clone(&greeter))
        .expect("Failed to register greeter");

    let (ready_tx, ready_rx) = oneshot::channel();
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(ready_tx).await })
    };
    ready_rx.await.expect("Server did not become ready");

    TestServer {
        server,
        greeter,
        plugins,
        serving,
    }
}

/// 连接到进程内地址的客户端
pub fn inproc_client(network: &InProcNetwork, address: &str, plugins: &Plugins) -> Client {
    let channel = network.dial(address).expect("Failed to dial inproc listener");
    Client::new(Arc::new(channel), &ClientOptions::default(), plugins)
}

pub fn encode<T: Serialize>(item: &T) -> Bytes {
    Bytes::from(serde_json::to_vec(item).expect("Failed to encode message"))
}

pub fn decode<T: serde::de::DeserializeOwned>(buf: &Bytes) -> T {
    serde_json::from_slice(buf).expect("Failed to decode message")
}

/// 轮询直到条件成立，超时则 panic
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

/// 等待异步任务结束，超时则 panic
pub async fn within<T>(what: &str, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}
