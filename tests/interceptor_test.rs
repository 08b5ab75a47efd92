//! 拦截器链测试

mod common;

use async_trait::async_trait;
use common::{HelloReply, HelloRequest, SAY_HELLO, inproc_client, inproc_options, inproc_plugins, serve_greeter};
use flare_rpc_core::client::{ClientOptions, ClientStream, ClientStreamDesc};
use flare_rpc_core::codec::JsonCodec;
use flare_rpc_core::error::{Code, Status};
use flare_rpc_core::interceptor::{
    AnyMessage, AuthInterceptor, InterceptorRegistry, StreamHandler, StreamServerInfo,
    StreamServerInterceptor, Streamer, TimeoutInterceptor, TokenValidator, UnaryClientInterceptor,
    UnaryHandler, UnaryInvoker, UnaryServerInfo, UnaryServerInterceptor, downcast_message,
};
use flare_rpc_core::metadata::{Context, Metadata};
use flare_rpc_core::protocol::InProcNetwork;
use flare_rpc_core::server::ServerStream;
use flare_rpc_core::Client;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

type Journal = Arc<Mutex<Vec<String>>>;

/// 记录进入与退出顺序的拦截器
struct Recorder {
    name: &'static str,
    journal: Journal,
}

impl Recorder {
    fn new(name: &'static str, journal: &Journal) -> Self {
        Self {
            name,
            journal: Arc::clone(journal),
        }
    }

    fn record(&self, phase: &str) {
        self.journal.lock().push(format!("{}:{}", self.name, phase));
    }
}

#[async_trait]
impl UnaryServerInterceptor for Recorder {
    async fn intercept(
        &self,
        ctx: Context,
        req: AnyMessage,
        _info: Arc<UnaryServerInfo>,
        next: UnaryHandler,
    ) -> Result<AnyMessage, Status> {
        self.record("before");
        let result = next.call(ctx, req).await;
        self.record("after");
        result
    }
}

#[async_trait]
impl StreamServerInterceptor for Recorder {
    async fn intercept(
        &self,
        stream: Arc<dyn ServerStream>,
        _info: Arc<StreamServerInfo>,
        next: StreamHandler,
    ) -> Result<(), Status> {
        self.record("before");
        let result = next.call(stream).await;
        self.record("after");
        result
    }
}

#[async_trait]
impl UnaryClientInterceptor for Recorder {
    async fn intercept(
        &self,
        ctx: Context,
        method: String,
        req: AnyMessage,
        next: UnaryInvoker,
    ) -> Result<AnyMessage, Status> {
        self.record("before");
        let ctx = ctx.append_outbound("x-interceptor", self.name);
        let result = next.call(ctx, method, req).await;
        self.record("after");
        result
    }
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn server_info() -> Arc<UnaryServerInfo> {
    Arc::new(UnaryServerInfo {
        full_method: SAY_HELLO.to_string(),
        server: Arc::new(()),
    })
}

fn echo_handler(journal: &Journal) -> UnaryHandler {
    let journal = Arc::clone(journal);
    UnaryHandler::new(move |_ctx: Context, req: AnyMessage| {
        let journal = Arc::clone(&journal);
        async move {
            journal.lock().push("handler".to_string());
            let name = downcast_message::<String>(req)?;
            Ok(Box::new(format!("echo {}", name)) as AnyMessage)
        }
    })
}

fn recording_registry(journal: &Journal, registered: &[&'static str]) -> InterceptorRegistry {
    let registry = InterceptorRegistry::new();
    for &name in registered {
        let journal = Arc::clone(journal);
        registry.register_unary_server(name, move || Arc::new(Recorder::new(name, &journal)));
    }
    registry
}

/// 测试：拦截器按列表顺序执行，处理器恰好执行一次
#[tokio::test]
async fn test_unary_chain_runs_in_list_order() {
    let journal: Journal = Arc::default();
    let registry = recording_registry(&journal, &["first", "second", "third"]);
    let chain = registry.build_unary_server_chain(&names(&["first", "second", "third"]));
    assert_eq!(chain.len(), 3);

    let reply = chain
        .call(Context::new(), Box::new("World".to_string()), server_info(), echo_handler(&journal))
        .await
        .expect("Chain call failed");

    assert_eq!(downcast_message::<String>(reply).expect("wrong reply type"), "echo World");
    assert_eq!(
        *journal.lock(),
        vec![
            "first:before",
            "second:before",
            "third:before",
            "handler",
            "third:after",
            "second:after",
            "first:after",
        ]
    );
}

/// 测试：未注册的名称被跳过，其余拦截器照常执行
#[tokio::test]
async fn test_unregistered_names_are_skipped() {
    let journal: Journal = Arc::default();
    let registry = recording_registry(&journal, &["logging"]);
    let chain = registry.build_unary_server_chain(&names(&["auth", "logging"]));
    assert_eq!(chain.len(), 1);

    chain
        .call(Context::new(), Box::new("World".to_string()), server_info(), echo_handler(&journal))
        .await
        .expect("Chain call failed");

    assert_eq!(*journal.lock(), vec!["logging:before", "handler", "logging:after"]);
}

/// 测试：空链直接调用处理器
#[tokio::test]
async fn test_empty_chain_calls_handler_directly() {
    let journal: Journal = Arc::default();
    let chain = InterceptorRegistry::new().build_unary_server_chain(&[]);
    assert!(chain.is_empty());

    chain
        .call(Context::new(), Box::new("x".to_string()), server_info(), echo_handler(&journal))
        .await
        .expect("Chain call failed");
    assert_eq!(*journal.lock(), vec!["handler"]);
}

struct StaticValidator;

#[async_trait]
impl TokenValidator for StaticValidator {
    async fn validate(&self, token: &str, _full_method: &str) -> Result<String, Status> {
        if token == "secret" {
            Ok("alice".to_string())
        } else {
            Err(Status::unauthenticated("bad token"))
        }
    }
}

/// 测试：认证拦截器拒绝时不调用后续处理器
#[tokio::test]
async fn test_auth_interceptor_short_circuits() {
    let journal: Journal = Arc::default();
    let registry = recording_registry(&journal, &["inner"]);
    registry.register_unary_server("auth", || Arc::new(AuthInterceptor::new(Arc::new(StaticValidator))));
    let chain = registry.build_unary_server_chain(&names(&["auth", "inner"]));

    let err = chain
        .call(Context::new(), Box::new("x".to_string()), server_info(), echo_handler(&journal))
        .await
        .expect_err("missing token should be rejected");
    assert_eq!(err.code(), Code::Unauthenticated);
    assert!(journal.lock().is_empty());

    let ctx = Context::new().with_inbound(Metadata::from_pairs([("authorization", "Bearer wrong")]));
    let err = chain
        .call(ctx, Box::new("x".to_string()), server_info(), echo_handler(&journal))
        .await
        .expect_err("wrong token should be rejected");
    assert_eq!(err.code(), Code::Unauthenticated);
    assert!(journal.lock().is_empty());

    let ctx = Context::new().with_inbound(Metadata::from_pairs([("Authorization", "Bearer secret")]));
    chain
        .call(ctx, Box::new("x".to_string()), server_info(), echo_handler(&journal))
        .await
        .expect("valid token should pass");
    assert_eq!(*journal.lock(), vec!["inner:before", "handler", "inner:after"]);
}

/// 测试：超时拦截器返回 DeadlineExceeded
#[tokio::test(start_paused = true)]
async fn test_timeout_interceptor() {
    let registry = InterceptorRegistry::new();
    registry.register_unary_server("timeout", || {
        Arc::new(TimeoutInterceptor::new(Duration::from_secs(1)))
    });
    let chain = registry.build_unary_server_chain(&names(&["timeout"]));

    let slow = UnaryHandler::new(|_ctx: Context, req: AnyMessage| async move {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(req)
    });

    let err = chain
        .call(Context::new(), Box::new(()), server_info(), slow)
        .await
        .expect_err("slow handler should time out");
    assert_eq!(err.code(), Code::DeadlineExceeded);
    assert!(err.message().contains(SAY_HELLO));
}

/// 测试：服务端配置 ["auth", "logging"] 时未注册的 auth 不影响分发
#[tokio::test]
async fn test_server_chain_with_missing_interceptor_still_dispatches() {
    let network = InProcNetwork::new();
    let journal: Journal = Arc::default();
    let plugins = inproc_plugins(&network);
    {
        let journal = Arc::clone(&journal);
        plugins
            .interceptors
            .register_unary_server("logging", move || Arc::new(Recorder::new("logging", &journal)));
    }
    let options = inproc_options("chain").with_unary_interceptors(["auth", "logging"]);
    let server = serve_greeter(options, plugins).await;

    let client = inproc_client(&network, "chain", &server.plugins);
    let reply: HelloReply = client
        .invoke(&Context::new(), SAY_HELLO, HelloRequest::new("World"), JsonCodec)
        .await
        .expect("SayHello failed");

    assert_eq!(reply.message, "Hello World");
    assert_eq!(*journal.lock(), vec!["logging:before", "logging:after"]);
    assert_eq!(server.greeter.calls(), 1);
    server.shutdown().await;
}

/// 测试：流式拦截器包裹流式处理器
#[tokio::test]
async fn test_stream_server_chain_wraps_stream_handlers() {
    let network = InProcNetwork::new();
    let journal: Journal = Arc::default();
    let plugins = inproc_plugins(&network);
    {
        let journal = Arc::clone(&journal);
        plugins
            .interceptors
            .register_stream_server("audit", move || Arc::new(Recorder::new("audit", &journal)));
    }
    let options = inproc_options("stream-chain").with_stream_interceptors(["audit"]);
    let server = serve_greeter(options, plugins).await;

    let client = inproc_client(&network, "stream-chain", &server.plugins);
    let stream = client
        .new_stream(
            &Context::new(),
            ClientStreamDesc::new("SayHelloRepeated", false, true),
            "/helloworld.Greeter/SayHelloRepeated",
        )
        .await
        .expect("Failed to open stream");
    stream
        .send_msg(common::encode(&HelloRequest::new("Stream")))
        .await
        .expect("Failed to send request");
    stream.close_send().await.expect("Failed to close send");

    let mut received = 0;
    while stream.recv_msg().await.expect("Stream failed").is_some() {
        received += 1;
    }
    assert_eq!(received, 3);

    server.shutdown().await;
    assert_eq!(*journal.lock(), vec!["audit:before", "audit:after"]);
}

/// 测试：客户端一元拦截器按顺序执行并可以追加出站元数据
#[tokio::test]
async fn test_client_unary_chain() {
    let network = InProcNetwork::new();
    let journal: Journal = Arc::default();

    let server = serve_greeter(inproc_options("client-chain"), inproc_plugins(&network)).await;

    let plugins = inproc_plugins(&network);
    for name in ["outer", "inner"] {
        let journal = Arc::clone(&journal);
        plugins
            .interceptors
            .register_unary_client(name, move || Arc::new(Recorder::new(name, &journal)));
    }
    let options = ClientOptions {
        unary_interceptors: names(&["outer", "missing", "inner"]),
        ..ClientOptions::default()
    };
    let channel = network.dial("client-chain").expect("Failed to dial");
    let client = Client::new(Arc::new(channel), &options, &plugins);

    let reply: HelloReply = client
        .invoke(&Context::new(), SAY_HELLO, HelloRequest::new("Client"), JsonCodec)
        .await
        .expect("SayHello failed");

    assert_eq!(reply.message, "Hello Client");
    assert_eq!(
        *journal.lock(),
        vec!["outer:before", "inner:before", "inner:after", "outer:after"]
    );
    server.shutdown().await;
}

/// 测试：客户端流式拦截器可以拒绝创建流
#[tokio::test]
async fn test_client_stream_interceptor_can_reject() {
    let network = InProcNetwork::new();
    let server = serve_greeter(inproc_options("client-stream"), inproc_plugins(&network)).await;

    let plugins = inproc_plugins(&network);
    plugins.interceptors.register_stream_client("deny", || {
        Arc::new(
            |_ctx: Context, desc: Arc<ClientStreamDesc>, _method: String, _next: Streamer| async move {
                Err::<Box<dyn ClientStream>, Status>(Status::permission_denied(format!(
                    "stream {} denied",
                    desc.stream_name
                )))
            },
        )
    });
    let options = ClientOptions {
        stream_interceptors: names(&["deny"]),
        ..ClientOptions::default()
    };
    let channel = network.dial("client-stream").expect("Failed to dial");
    let client = Client::new(Arc::new(channel), &options, &plugins);

    let err = client
        .new_stream(
            &Context::new(),
            ClientStreamDesc::new("Chat", true, true),
            "/helloworld.Greeter/Chat",
        )
        .await
        .err()
        .expect("stream should be denied");
    assert_eq!(err.code(), Code::PermissionDenied);
    assert_eq!(err.message(), "stream Chat denied");

    server.shutdown().await;
}
