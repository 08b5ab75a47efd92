//! 统计处理器测试

mod common;

use common::{HelloReply, HelloRequest, SAY_HELLO, inproc_client, inproc_options, inproc_plugins, serve_greeter};
use flare_rpc_core::codec::JsonCodec;
use flare_rpc_core::error::Code;
use flare_rpc_core::metadata::Context;
use flare_rpc_core::protocol::InProcNetwork;
use flare_rpc_core::stats::{
    ChannelStats, HandlerChain, RpcStats, RpcTagInfo, StatsHandler, StatsRegistry,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// 记录全部事件的统计处理器
#[derive(Default)]
struct Recording {
    rpc: Mutex<Vec<RpcStats>>,
    channels: Mutex<Vec<ChannelStats>>,
    tag: Option<&'static str>,
}

impl Recording {
    fn tagging(tag: &'static str) -> Self {
        Self {
            tag: Some(tag),
            ..Self::default()
        }
    }

    fn kinds(&self) -> Vec<&'static str> {
        self.rpc
            .lock()
            .iter()
            .map(|s| match s {
                RpcStats::Begin { .. } => "begin",
                RpcStats::InPayload { .. } => "in_payload",
                RpcStats::OutPayload { .. } => "out_payload",
                RpcStats::OutHeader { .. } => "out_header",
                RpcStats::OutTrailer { .. } => "out_trailer",
                RpcStats::End { .. } => "end",
            })
            .collect()
    }
}

impl StatsHandler for Recording {
    fn tag_rpc(&self, ctx: Context, _info: &RpcTagInfo) -> Context {
        match self.tag {
            Some(tag) => ctx.append_outbound("x-stats-tag", tag),
            None => ctx,
        }
    }

    fn handle_rpc(&self, _ctx: &Context, stats: &RpcStats) {
        self.rpc.lock().push(stats.clone());
    }

    fn handle_channel(&self, _ctx: &Context, stats: &ChannelStats) {
        self.channels.lock().push(stats.clone());
    }
}

/// 测试：tag_rpc 按注册顺序传递上下文，handle_rpc 扇出到全部处理器
#[test]
fn test_handler_chain_fans_out_in_order() {
    let first = Arc::new(Recording::tagging("first"));
    let second = Arc::new(Recording::tagging("second"));
    let chain = HandlerChain::new(vec![first.clone(), second.clone()]);
    assert_eq!(chain.len(), 2);

    let ctx = chain.tag_rpc(
        Context::new(),
        &RpcTagInfo {
            full_method: SAY_HELLO.to_string(),
            is_client: false,
        },
    );
    let tags = ctx.outbound().expect("tags missing");
    assert_eq!(tags.get("x-stats-tag"), ["first", "second"]);

    chain.handle_rpc(&ctx, &RpcStats::InPayload { length: 3 });
    assert_eq!(first.kinds(), vec!["in_payload"]);
    assert_eq!(second.kinds(), vec!["in_payload"]);
}

/// 测试：空处理器链是合法的空操作
#[test]
fn test_empty_handler_chain_is_noop() {
    let chain = HandlerChain::default();
    assert!(chain.is_empty());
    let ctx = Context::new();
    let tagged = chain.tag_rpc(
        ctx.clone(),
        &RpcTagInfo {
            full_method: SAY_HELLO.to_string(),
            is_client: true,
        },
    );
    assert!(tagged.outbound().is_none());
    chain.handle_rpc(&tagged, &RpcStats::OutPayload { length: 1 });
}

/// 测试：未注册的处理器名称被跳过，处理器链只构建一次
#[test]
fn test_registry_skips_unknown_and_caches_chain() {
    let registry = StatsRegistry::with_builtins();
    let chain = registry.handler(true, &["logging".to_string(), "missing".to_string()]);
    assert_eq!(chain.len(), 1);

    let again = registry.handler(true, &["metrics".to_string(), "logging".to_string()]);
    assert!(Arc::ptr_eq(&chain, &again));

    let client = registry.handler(false, &[]);
    assert!(client.is_empty());
}

/// 测试：服务端一元调用的事件顺序
#[tokio::test]
async fn test_server_rpc_event_sequence() {
    let network = InProcNetwork::new();
    let recording = Arc::new(Recording::default());
    let plugins = inproc_plugins(&network);
    {
        let recording = Arc::clone(&recording);
        plugins
            .stats
            .register("recording", move |_| recording.clone() as Arc<dyn StatsHandler>);
    }
    let options = inproc_options("stats").with_stats_handlers(["recording", "metrics"]);
    let server = serve_greeter(options, plugins).await;
    let client = inproc_client(&network, "stats", &server.plugins);

    let _: HelloReply = client
        .invoke(&Context::new(), SAY_HELLO, HelloRequest::new("World"), JsonCodec)
        .await
        .expect("SayHello failed");
    let _ = client
        .invoke::<_, HelloReply, _>(&Context::new(), SAY_HELLO, HelloRequest::new(""), JsonCodec)
        .await
        .expect_err("empty name should fail");

    let metrics = server.plugins.stats.metrics();
    server.shutdown().await;

    let kinds = recording.kinds();
    assert_eq!(
        &kinds[..6],
        ["begin", "in_payload", "out_header", "out_trailer", "out_payload", "end"]
    );
    assert_eq!(&kinds[6..], ["begin", "in_payload", "end"]);

    let ends: Vec<(String, Option<Code>)> = recording
        .rpc
        .lock()
        .iter()
        .filter_map(|s| match s {
            RpcStats::End {
                full_method, error, ..
            } => Some((full_method.clone(), error.as_ref().map(|e| e.code()))),
            _ => None,
        })
        .collect();
    assert_eq!(
        ends,
        vec![
            (SAY_HELLO.to_string(), None),
            (SAY_HELLO.to_string(), Some(Code::InvalidArgument)),
        ]
    );

    let snapshot = metrics.get_metrics();
    assert_eq!(snapshot.requests_total, 2);
    assert_eq!(snapshot.requests_success, 1);
    assert_eq!(snapshot.requests_failed, 1);
    let method = snapshot.methods.get(SAY_HELLO).expect("method metrics missing");
    assert_eq!(method.requests_total, 2);
    assert_eq!(method.requests_failed, 1);

    let channels = recording.channels.lock();
    assert_eq!(channels.len(), 2);
    assert!(matches!(&channels[0], ChannelStats::Begin { info } if info.address == "stats"));
    assert!(matches!(&channels[1], ChannelStats::End { error: None, .. }));
}

/// 测试：客户端调用的事件
#[tokio::test]
async fn test_client_rpc_events() {
    let network = InProcNetwork::new();
    let server = serve_greeter(inproc_options("client-stats"), inproc_plugins(&network)).await;

    let recording = Arc::new(Recording::default());
    let plugins = inproc_plugins(&network);
    {
        let recording = Arc::clone(&recording);
        plugins
            .stats
            .register("recording", move |_| recording.clone() as Arc<dyn StatsHandler>);
    }
    let options = flare_rpc_core::client::ClientOptions {
        stats_handlers: vec!["recording".to_string()],
        ..Default::default()
    };
    let channel = network.dial("client-stats").expect("Failed to dial");
    let client = flare_rpc_core::Client::new(Arc::new(channel), &options, &plugins);

    let _: HelloReply = client
        .invoke(&Context::new(), SAY_HELLO, HelloRequest::new("World"), JsonCodec)
        .await
        .expect("SayHello failed");

    assert_eq!(recording.kinds(), vec!["begin", "out_payload", "in_payload", "end"]);
    assert!(matches!(
        recording.rpc.lock()[0],
        RpcStats::Begin { is_client: true, .. }
    ));

    server.shutdown().await;
}
