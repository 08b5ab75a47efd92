//! 调用上下文
//!
//! `Context` 只负责取消信号与不可变的入站 / 出站元数据；
//! 流级可变状态（header / trailer 缓冲区）由独立的 [`CallScope`] 承载，
//! 由分发器在调用期间持有并交给处理器。

use super::Metadata;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// 元数据操作错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// 非流级上下文上设置 header / trailer
    #[error("failed to fetch the stream state")]
    StreamStateMissing,
}

/// 单次调用的可变元数据缓冲区
///
/// header 与 trailer 各自独立加锁，处理器与拦截器可以并发写入。
#[derive(Debug, Clone, Default)]
pub struct CallScope {
    inner: Arc<ScopeInner>,
}

#[derive(Debug, Default)]
struct ScopeInner {
    header: Mutex<Metadata>,
    trailer: Mutex<Metadata>,
}

impl CallScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并追加 header
    pub fn set_header(&self, md: &Metadata) {
        self.inner.header.lock().merge(md);
    }

    /// 合并追加 trailer
    pub fn set_trailer(&self, md: &Metadata) {
        self.inner.trailer.lock().merge(md);
    }

    /// 当前 header 的副本
    pub fn header(&self) -> Metadata {
        self.inner.header.lock().clone()
    }

    /// 当前 trailer 的副本
    pub fn trailer(&self) -> Metadata {
        self.inner.trailer.lock().clone()
    }
}

/// 调用上下文
///
/// 克隆开销很小：取消令牌与元数据都以引用计数共享，元数据本身不可变，
/// 读取总是返回独立副本。
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    inbound: Option<Arc<Metadata>>,
    outbound: Option<Arc<Metadata>>,
    scope: Option<CallScope>,
}

impl Context {
    /// 创建根上下文
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用指定的取消令牌创建上下文
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            ..Self::default()
        }
    }

    /// 派生子上下文：继承全部元数据，取消令牌为父令牌的子令牌
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            inbound: self.inbound.clone(),
            outbound: self.outbound.clone(),
            scope: self.scope.clone(),
        }
    }

    // ============================================================
    // 取消
    // ============================================================

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 等待取消
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    // ============================================================
    // 入站 / 出站元数据
    // ============================================================

    /// 附加入站元数据，与已附加的入站元数据合并（已有值在前）
    pub fn with_inbound(&self, md: Metadata) -> Self {
        let mut next = self.clone();
        next.inbound = Some(Arc::new(merged(self.inbound.as_deref(), md)));
        next
    }

    /// 附加出站元数据，与已附加的出站元数据合并（已有值在前）
    pub fn with_outbound(&self, md: Metadata) -> Self {
        let mut next = self.clone();
        next.outbound = Some(Arc::new(merged(self.outbound.as_deref(), md)));
        next
    }

    /// 追加单个出站键值
    pub fn append_outbound(&self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        let mut md = Metadata::new();
        md.append(key, [value]);
        self.with_outbound(md)
    }

    /// 入站元数据副本
    pub fn inbound(&self) -> Option<Metadata> {
        self.inbound.as_deref().cloned()
    }

    /// 出站元数据副本
    pub fn outbound(&self) -> Option<Metadata> {
        self.outbound.as_deref().cloned()
    }

    // ============================================================
    // 流级 header / trailer
    // ============================================================

    /// 安装新的流级缓冲区
    pub fn with_stream_scope(&self) -> Self {
        self.with_scope(CallScope::new())
    }

    /// 安装指定的流级缓冲区
    pub fn with_scope(&self, scope: CallScope) -> Self {
        let mut next = self.clone();
        next.scope = Some(scope);
        next
    }

    pub fn scope(&self) -> Option<&CallScope> {
        self.scope.as_ref()
    }

    /// 合并写入 header，要求上下文为流级上下文
    pub fn set_header(&self, md: &Metadata) -> Result<(), MetadataError> {
        let scope = self.scope.as_ref().ok_or(MetadataError::StreamStateMissing)?;
        scope.set_header(md);
        Ok(())
    }

    /// 合并写入 trailer，要求上下文为流级上下文
    pub fn set_trailer(&self, md: &Metadata) -> Result<(), MetadataError> {
        let scope = self.scope.as_ref().ok_or(MetadataError::StreamStateMissing)?;
        scope.set_trailer(md);
        Ok(())
    }

    /// header 副本
    pub fn header(&self) -> Option<Metadata> {
        self.scope.as_ref().map(CallScope::header)
    }

    /// trailer 副本
    pub fn trailer(&self) -> Option<Metadata> {
        self.scope.as_ref().map(CallScope::trailer)
    }
}

fn merged(existing: Option<&Metadata>, md: Metadata) -> Metadata {
    match existing {
        Some(existing) => {
            let mut out = existing.clone();
            out.merge(&md);
            out
        }
        None => md,
    }
}
