use super::{ChannelStats, ChannelTagInfo, RpcStats, RpcTagInfo, StatsHandler};
use crate::metadata::Context;
use std::sync::Arc;

/// 统计处理器链
///
/// 按注册顺序扇出事件；空链是合法的空操作处理器。
#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn StatsHandler>>,
}

impl HandlerChain {
    pub fn new(handlers: Vec<Arc<dyn StatsHandler>>) -> Self {
        Self { handlers }
    }

    pub fn push(&mut self, handler: Arc<dyn StatsHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl StatsHandler for HandlerChain {
    fn tag_rpc(&self, ctx: Context, info: &RpcTagInfo) -> Context {
        self.handlers
            .iter()
            .fold(ctx, |ctx, handler| handler.tag_rpc(ctx, info))
    }

    fn handle_rpc(&self, ctx: &Context, stats: &RpcStats) {
        for handler in &self.handlers {
            handler.handle_rpc(ctx, stats);
        }
    }

    fn tag_channel(&self, ctx: Context, info: &ChannelTagInfo) -> Context {
        self.handlers
            .iter()
            .fold(ctx, |ctx, handler| handler.tag_channel(ctx, info))
    }

    fn handle_channel(&self, ctx: &Context, stats: &ChannelStats) {
        for handler in &self.handlers {
            handler.handle_channel(ctx, stats);
        }
    }
}
