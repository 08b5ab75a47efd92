//! 元数据与调用上下文测试

use flare_rpc_core::metadata::{CallScope, Context, Metadata, MetadataError};

/// 测试：键大小写不敏感
#[test]
fn test_keys_are_case_insensitive() {
    let mut md = Metadata::new();
    md.append("X-Request-Id", ["abc"]);

    assert_eq!(md.get("x-request-id"), ["abc"]);
    assert_eq!(md.get("X-REQUEST-ID"), ["abc"]);
    assert!(md.contains_key("x-Request-id"));
    assert_eq!(md.keys().collect::<Vec<_>>(), vec!["x-request-id"]);
}

/// 测试：append 保持顺序，set 替换全部值
#[test]
fn test_append_preserves_order_and_set_replaces() {
    let mut md = Metadata::new();
    md.append("k", ["a"]);
    md.append("k", ["b"]);
    assert_eq!(md.get("k"), ["a", "b"]);

    md.set("k", ["c"]);
    assert_eq!(md.get("k"), ["c"]);

    md.set("k", Vec::<String>::new());
    assert!(!md.contains_key("k"));
    assert!(md.get("k").is_empty());
}

/// 测试：副本修改不影响原值
#[test]
fn test_clone_is_independent() {
    let original = Metadata::from_pairs([("k", "v")]);
    let mut copy = original.clone();
    copy.set("k", ["changed"]);
    copy.append("other", ["x"]);

    assert_eq!(original.get("k"), ["v"]);
    assert!(!original.contains_key("other"));
}

/// 测试：合并同名键按合并顺序拼接
#[test]
fn test_merge_concatenates_values() {
    let first = Metadata::from_pairs([("k", "a"), ("only-first", "1")]);
    let second = Metadata::from_pairs([("K", "b"), ("k", "c")]);

    let joined = Metadata::join([&first, &second]);
    assert_eq!(joined.get("k"), ["a", "b", "c"]);
    assert_eq!(joined.get("only-first"), ["1"]);

    let mut merged = second.clone();
    merged.merge(&first);
    assert_eq!(merged.get("k"), ["b", "c", "a"]);
}

/// 测试：上下文读取返回独立副本
#[test]
fn test_context_reads_never_alias() {
    let ctx = Context::new().with_inbound(Metadata::from_pairs([("user", "alice")]));

    let mut first = ctx.inbound().expect("inbound metadata missing");
    first.set("user", ["mallory"]);
    let second = ctx.inbound().expect("inbound metadata missing");

    assert_eq!(second.get("user"), ["alice"]);
}

/// 测试：入站 / 出站元数据逐次合并
#[test]
fn test_outbound_metadata_accumulates() {
    let ctx = Context::new()
        .append_outbound("trace", "one")
        .append_outbound("trace", "two")
        .with_outbound(Metadata::from_pairs([("tenant", "t1")]));

    let outbound = ctx.outbound().expect("outbound metadata missing");
    assert_eq!(outbound.get("trace"), ["one", "two"]);
    assert_eq!(outbound.get("tenant"), ["t1"]);
    assert!(ctx.inbound().is_none());
}

/// 测试：非流级上下文上设置 header 返回错误
#[test]
fn test_header_requires_stream_scope() {
    let ctx = Context::new();
    let md = Metadata::from_pairs([("k", "v")]);

    let err = ctx.set_header(&md).expect_err("set_header should fail");
    assert_eq!(err, MetadataError::StreamStateMissing);
    assert_eq!(err.to_string(), "failed to fetch the stream state");
    assert_eq!(ctx.set_trailer(&md), Err(MetadataError::StreamStateMissing));
    assert!(ctx.header().is_none());
    assert!(ctx.trailer().is_none());
}

/// 测试：流级上下文的 header / trailer 合并写入
#[test]
fn test_stream_scope_collects_header_and_trailer() {
    let ctx = Context::new().with_stream_scope();
    ctx.set_header(&Metadata::from_pairs([("h", "1")]))
        .expect("Failed to set header");
    ctx.set_header(&Metadata::from_pairs([("h", "2")]))
        .expect("Failed to set header");
    ctx.set_trailer(&Metadata::from_pairs([("t", "x")]))
        .expect("Failed to set trailer");

    assert_eq!(ctx.header().expect("header missing").get("h"), ["1", "2"]);
    assert_eq!(ctx.trailer().expect("trailer missing").get("t"), ["x"]);
}

/// 测试：子上下文共享同一个 CallScope，取消只向下传播
#[test]
fn test_child_shares_scope_and_cancellation_flows_down() {
    let scope = CallScope::new();
    let parent = Context::new().with_scope(scope.clone());
    let child = parent.child();

    child
        .set_header(&Metadata::from_pairs([("from", "child")]))
        .expect("Failed to set header");
    assert_eq!(scope.header().get("from"), ["child"]);

    child.cancel();
    assert!(child.is_cancelled());
    assert!(!parent.is_cancelled());

    let child = parent.child();
    parent.cancel();
    assert!(child.is_cancelled());
}

/// 测试：并发写入 header 不丢失
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_header_writes() {
    let ctx = Context::new().with_stream_scope();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            ctx.set_header(&Metadata::from_pairs([("n", i.to_string())]))
                .expect("Failed to set header");
        }));
    }
    for task in tasks {
        task.await.expect("Task panicked");
    }

    let header = ctx.header().expect("header missing");
    assert_eq!(header.get("n").len(), 16);
}
