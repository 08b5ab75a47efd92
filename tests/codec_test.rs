//! 编解码器测试

mod common;

use bytes::Bytes;
use common::{inproc_client, inproc_options, inproc_plugins, within};
use flare_rpc_core::codec::{Codec, JsonCodec, ProstCodec};
use flare_rpc_core::error::{Code, Status};
use flare_rpc_core::metadata::Context;
use flare_rpc_core::protocol::InProcNetwork;
use flare_rpc_core::server::{MethodDesc, Server, ServiceDesc};
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Clone, PartialEq, prost::Message)]
struct Ping {
    #[prost(string, tag = "1")]
    text: String,
    #[prost(uint32, tag = "2")]
    count: u32,
}

/// 测试：解码失败映射为 InvalidArgument
#[test]
fn test_decode_errors_are_invalid_argument() {
    let json: Result<common::HelloRequest, Status> = JsonCodec.decode(Bytes::from_static(b"not json"));
    assert_eq!(json.expect_err("json decode should fail").code(), Code::InvalidArgument);

    let proto: Result<Ping, Status> = ProstCodec.decode(Bytes::from_static(&[0xff, 0xff, 0xff]));
    let status = proto.expect_err("proto decode should fail");
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().starts_with("proto decode failed"));

    assert_eq!(<JsonCodec as Codec<common::HelloRequest>>::name(&JsonCodec), "json");
    assert_eq!(<ProstCodec as Codec<Ping>>::name(&ProstCodec), "proto");
}

/// 测试：Protobuf 消息经过进程内协议端到端调用
#[tokio::test]
async fn test_prost_codec_end_to_end() {
    let network = InProcNetwork::new();
    let desc: ServiceDesc<()> = ServiceDesc::new("test.Pinger").method(MethodDesc::unary(
        "Ping",
        ProstCodec,
        |_svc: Arc<()>, _ctx: Context, req: Ping| async move {
            Ok::<_, Status>(Ping {
                text: format!("pong: {}", req.text),
                count: req.count + 1,
            })
        },
    ));

    let plugins = Arc::new(inproc_plugins(&network));
    let server = Arc::new(Server::new(inproc_options("pinger"), Arc::clone(&plugins)));
    server
        .register_service(desc, Arc::new(()))
        .expect("Failed to register pinger");
    let (ready_tx, ready_rx) = oneshot::channel();
    let serving = {
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(ready_tx).await })
    };
    ready_rx.await.expect("Server did not become ready");

    let reply: Ping = inproc_client(&network, "pinger", &plugins)
        .invoke(
            &Context::new(),
            "/test.Pinger/Ping",
            Ping {
                text: "hi".to_string(),
                count: 1,
            },
            ProstCodec,
        )
        .await
        .expect("Ping failed");
    assert_eq!(
        reply,
        Ping {
            text: "pong: hi".to_string(),
            count: 2,
        }
    );

    server.stop().await.expect("Failed to stop server");
    within("serve to return", serving)
        .await
        .expect("Serve task panicked")
        .expect("Serve returned an error");
}
