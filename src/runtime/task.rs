//! 内部服务器定义
//!
//! 与主服务端一起调度的附属组件（管理端口、指标端口、后台消费者等）。

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// 内部服务器
#[async_trait]
pub trait InternalServer: Send + Sync + 'static {
    /// 名称，用于日志
    fn name(&self) -> &str;

    /// 运行到停止为止
    async fn serve(&self) -> anyhow::Result<()>;

    /// 请求停止，`serve` 随后返回
    async fn stop(&self) -> anyhow::Result<()>;
}

type ServeFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// 由闭包构造的内部服务器
///
/// 闭包接收关闭令牌，令牌取消时应尽快返回。
pub struct SpawnServer {
    name: String,
    serve_fn: Mutex<Option<ServeFn>>,
    shutdown: CancellationToken,
}

impl SpawnServer {
    /// # 示例
    /// ```rust,no_run
    /// use flare_rpc_core::runtime::SpawnServer;
    ///
    /// let server = SpawnServer::new("consumer", |shutdown| async move {
    ///     shutdown.cancelled().await;
    ///     Ok(())
    /// });
    /// ```
    pub fn new<F, Fut>(name: impl Into<String>, serve_fn: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            serve_fn: Mutex::new(Some(Box::new(move |shutdown| Box::pin(serve_fn(shutdown))))),
            shutdown: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl InternalServer for SpawnServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn serve(&self) -> anyhow::Result<()> {
        let serve_fn = self.serve_fn.lock().take();
        match serve_fn {
            Some(serve_fn) => serve_fn(self.shutdown.clone()).await,
            None => anyhow::bail!("internal server {} already served", self.name),
        }
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}
