use super::{
    AnyMessage, StreamHandler, StreamServerInfo, StreamServerInterceptor, UnaryHandler,
    UnaryServerInfo, UnaryServerInterceptor,
};
use crate::error::Status;
use crate::metadata::{Context, Metadata};
use crate::server::ServerStream;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{Instrument, debug, info_span};

/// 追踪 ID 元数据键
pub const TRACE_ID_KEY: &str = "x-trace-id";
/// 请求 ID 元数据键
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// 追踪信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceInfo {
    pub trace_id: String,
    pub request_id: String,
}

/// 从入站元数据提取追踪信息
pub fn extract_trace_info(ctx: &Context) -> Option<TraceInfo> {
    let inbound = ctx.inbound()?;

    let trace_id = inbound.get_first(TRACE_ID_KEY).unwrap_or("").to_string();
    let request_id = inbound.get_first(REQUEST_ID_KEY).unwrap_or("").to_string();

    if trace_id.is_empty() && request_id.is_empty() {
        return None;
    }

    Some(TraceInfo {
        trace_id,
        request_id,
    })
}

/// 追踪拦截器
///
/// 为每次调用打开一个 span，并把请求 ID 回写到响应 header
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInterceptor;

impl TracingInterceptor {
    pub fn new() -> Self {
        Self
    }
}

fn echo_request_id(ctx: &Context, trace: &TraceInfo) {
    if trace.request_id.is_empty() {
        return;
    }
    let mut md = Metadata::new();
    md.insert(REQUEST_ID_KEY, trace.request_id.clone());
    if let Err(err) = ctx.set_header(&md) {
        debug!(error = %err, "Request id not echoed");
    }
}

#[async_trait]
impl UnaryServerInterceptor for TracingInterceptor {
    async fn intercept(
        &self,
        ctx: Context,
        req: AnyMessage,
        info: Arc<UnaryServerInfo>,
        next: UnaryHandler,
    ) -> Result<AnyMessage, Status> {
        let trace = extract_trace_info(&ctx).unwrap_or_default();
        echo_request_id(&ctx, &trace);

        let span = info_span!(
            "rpc",
            method = %info.full_method,
            trace_id = %trace.trace_id,
            request_id = %trace.request_id
        );
        next.call(ctx, req).instrument(span).await
    }
}

#[async_trait]
impl StreamServerInterceptor for TracingInterceptor {
    async fn intercept(
        &self,
        stream: Arc<dyn ServerStream>,
        info: Arc<StreamServerInfo>,
        next: StreamHandler,
    ) -> Result<(), Status> {
        let trace = extract_trace_info(stream.context()).unwrap_or_default();
        if !trace.request_id.is_empty() {
            let mut md = Metadata::new();
            md.insert(REQUEST_ID_KEY, trace.request_id.clone());
            if let Err(status) = stream.set_header(md) {
                debug!(error = %status, "Request id not echoed");
            }
        }

        let span = info_span!(
            "rpc_stream",
            method = %info.full_method,
            trace_id = %trace.trace_id,
            request_id = %trace.request_id
        );
        next.call(stream).instrument(span).await
    }
}
