//! 调用统计模块
//!
//! 分发器在调用生命周期的各个阶段通知统计处理器；
//! `tag_*` 可以改写上下文并顺序传递给下一个处理器，`handle_*` 只做通知。

pub mod chain;
pub mod logging;
pub mod metrics;
pub mod registry;

pub use chain::HandlerChain;
pub use logging::LoggingStatsHandler;
pub use metrics::{MethodMetrics, Metrics, MetricsCollector, MetricsStatsHandler};
pub use registry::{StatsBuilder, StatsRegistry};

use crate::error::Status;
use crate::metadata::{Context, Metadata};
use crate::protocol::ListenerInfo;
use std::time::Duration;

/// RPC 标记信息
#[derive(Debug, Clone)]
pub struct RpcTagInfo {
    pub full_method: String,
    pub is_client: bool,
}

/// RPC 生命周期事件
#[derive(Debug, Clone)]
pub enum RpcStats {
    Begin {
        is_client: bool,
        client_stream: bool,
        server_stream: bool,
    },
    InPayload {
        length: usize,
    },
    OutPayload {
        length: usize,
    },
    OutHeader {
        header: Metadata,
    },
    OutTrailer {
        trailer: Metadata,
    },
    End {
        full_method: String,
        elapsed: Duration,
        error: Option<Status>,
    },
}

/// 通道标记信息
#[derive(Debug, Clone)]
pub struct ChannelTagInfo {
    pub info: ListenerInfo,
}

/// 通道生命周期事件
#[derive(Debug, Clone)]
pub enum ChannelStats {
    Begin { info: ListenerInfo },
    End { info: ListenerInfo, error: Option<String> },
}

/// 统计处理器
pub trait StatsHandler: Send + Sync + 'static {
    /// 标记 RPC，返回的上下文用于后续阶段
    fn tag_rpc(&self, ctx: Context, _info: &RpcTagInfo) -> Context {
        ctx
    }

    fn handle_rpc(&self, _ctx: &Context, _stats: &RpcStats) {}

    /// 标记通道
    fn tag_channel(&self, ctx: Context, _info: &ChannelTagInfo) -> Context {
        ctx
    }

    fn handle_channel(&self, _ctx: &Context, _stats: &ChannelStats) {}
}
