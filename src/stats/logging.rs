use super::{ChannelStats, RpcStats, StatsHandler};
use crate::metadata::Context;
use tracing::{debug, info, warn};

/// 日志统计处理器
#[derive(Debug, Clone, Copy)]
pub struct LoggingStatsHandler {
    is_server: bool,
}

impl LoggingStatsHandler {
    pub fn new(is_server: bool) -> Self {
        Self { is_server }
    }

    fn side(&self) -> &'static str {
        if self.is_server { "server" } else { "client" }
    }
}

impl StatsHandler for LoggingStatsHandler {
    fn handle_rpc(&self, _ctx: &Context, stats: &RpcStats) {
        match stats {
            RpcStats::Begin {
                client_stream,
                server_stream,
                ..
            } => debug!(side = self.side(), client_stream, server_stream, "RPC begin"),
            RpcStats::InPayload { length } => debug!(side = self.side(), length, "RPC in payload"),
            RpcStats::OutPayload { length } => {
                debug!(side = self.side(), length, "RPC out payload")
            }
            RpcStats::OutHeader { header } => {
                debug!(side = self.side(), keys = header.len(), "RPC out header")
            }
            RpcStats::OutTrailer { trailer } => {
                debug!(side = self.side(), keys = trailer.len(), "RPC out trailer")
            }
            RpcStats::End {
                full_method,
                elapsed,
                error,
            } => debug!(
                side = self.side(),
                method = %full_method,
                elapsed_ms = elapsed.as_millis() as u64,
                code = %error.as_ref().map(|s| s.code().as_str()).unwrap_or("OK"),
                "RPC end"
            ),
        }
    }

    fn handle_channel(&self, _ctx: &Context, stats: &ChannelStats) {
        match stats {
            ChannelStats::Begin { info } => info!(
                protocol = %info.protocol,
                address = %info.address,
                "Channel begin"
            ),
            ChannelStats::End { info, error: None } => info!(
                protocol = %info.protocol,
                address = %info.address,
                "Channel end"
            ),
            ChannelStats::End {
                info,
                error: Some(error),
            } => warn!(
                protocol = %info.protocol,
                address = %info.address,
                error = %error,
                "Channel end with error"
            ),
        }
    }
}
