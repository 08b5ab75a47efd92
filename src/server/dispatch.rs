//! 调用分发
//!
//! 协议层把每个入站调用交给 [`Dispatcher::handle`]：解析方法名、查找服务、
//! 经过拦截器链执行处理器，最后把 header / trailer 与结果交还给传输层。

use super::service::{BoundUnary, ServiceEntry, StreamMethod};
use super::stream::{CallStream, ServerStream};
use crate::error::Status;
use crate::interceptor::{StreamHandler, StreamServerChain, StreamServerInfo, UnaryServerChain, UnaryServerInfo};
use crate::metadata::Context;
use crate::stats::{HandlerChain, RpcStats, RpcTagInfo, StatsHandler};
use bytes::Bytes;
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// 协议构建器拿到的调用入口
pub type MethodHandle = Dispatcher;

/// 解析完整方法名 `/service/method`
///
/// 去掉开头的 `/` 后按最后一个 `/` 切分，没有 `/` 时返回 `Unimplemented`。
pub fn parse_method(full_method: &str) -> Result<(&str, &str), Status> {
    let trimmed = full_method.strip_prefix('/').unwrap_or(full_method);
    match trimmed.rfind('/') {
        Some(pos) => Ok((&trimmed[..pos], &trimmed[pos + 1..])),
        None => Err(Status::unimplemented(format!(
            "malformed method name: {}",
            full_method
        ))),
    }
}

/// 调用分发器
///
/// 服务表在 `serve` 时冻结，调用路径上不加锁。
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    services: HashMap<String, Arc<ServiceEntry>>,
    unary_chain: UnaryServerChain,
    stream_chain: StreamServerChain,
    stats: Arc<HandlerChain>,
}

impl Dispatcher {
    pub(crate) fn new(
        services: HashMap<String, Arc<ServiceEntry>>,
        unary_chain: UnaryServerChain,
        stream_chain: StreamServerChain,
        stats: Arc<HandlerChain>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                services,
                unary_chain,
                stream_chain,
                stats,
            }),
        }
    }

    /// 处理一次调用，返回前保证 `finish` 已被调用
    pub async fn handle(&self, stream: Arc<dyn ServerStream>) {
        let mut guard = FinishGuard::new(Arc::clone(&stream));
        let full_method = stream.method().to_string();

        let (service, method) = match parse_method(&full_method) {
            Ok(parts) => parts,
            Err(status) => {
                debug!(method = %full_method, "Malformed method name");
                guard.finish(Err(status)).await;
                return;
            }
        };

        let Some(entry) = self.inner.services.get(service) else {
            debug!(service = %service, "Unknown service");
            guard
                .finish(Err(Status::unimplemented(format!("unknown service {}", service))))
                .await;
            return;
        };

        if let Some(handler) = entry.methods.get(method) {
            self.process_unary(&mut guard, entry, handler, &full_method).await;
        } else if let Some(desc) = entry.streams.get(method) {
            self.process_stream(&mut guard, entry, desc, &full_method).await;
        } else {
            debug!(service = %service, method = %method, "Unknown method");
            guard
                .finish(Err(Status::unimplemented(format!(
                    "unknown method {} for service {}",
                    method, service
                ))))
                .await;
        }
    }

    async fn process_unary(
        &self,
        guard: &mut FinishGuard,
        entry: &ServiceEntry,
        handler: &BoundUnary,
        full_method: &str,
    ) {
        let stats = &self.inner.stats;
        let stream = Arc::clone(&guard.stream);
        let begin = Instant::now();

        let stats_ctx = stats.tag_rpc(
            stream.context().clone(),
            &RpcTagInfo {
                full_method: full_method.to_string(),
                is_client: false,
            },
        );
        stats.handle_rpc(
            &stats_ctx,
            &RpcStats::Begin {
                is_client: false,
                client_stream: false,
                server_stream: false,
            },
        );

        let call_ctx = stats_ctx.child().with_stream_scope();
        let _cancel_on_exit = call_ctx.token().clone().drop_guard();

        let info = Arc::new(UnaryServerInfo {
            full_method: full_method.to_string(),
            server: Arc::clone(&entry.server),
        });

        let call = async {
            stream.start(false, false).await?;
            let payload = stream
                .recv_msg()
                .await?
                .ok_or_else(|| Status::invalid_argument("missing request message"))?;
            stats.handle_rpc(&call_ctx, &RpcStats::InPayload { length: payload.len() });
            handler(call_ctx.clone(), payload, info, self.inner.unary_chain.clone()).await
        };
        let result = AssertUnwindSafe(call)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_status(full_method, panic)));

        self.flush_metadata(&stream, &call_ctx);
        if let Ok(reply) = &result {
            stats.handle_rpc(&call_ctx, &RpcStats::OutPayload { length: reply.len() });
        }

        let error = result.as_ref().err().cloned();
        guard.finish(result.map(Some)).await;

        stats.handle_rpc(
            &call_ctx,
            &RpcStats::End {
                full_method: full_method.to_string(),
                elapsed: begin.elapsed(),
                error,
            },
        );
    }

    async fn process_stream(
        &self,
        guard: &mut FinishGuard,
        entry: &ServiceEntry,
        desc: &StreamMethod,
        full_method: &str,
    ) {
        let stats = &self.inner.stats;
        let stream = Arc::clone(&guard.stream);
        let begin = Instant::now();

        let stats_ctx = stats.tag_rpc(
            stream.context().clone(),
            &RpcTagInfo {
                full_method: full_method.to_string(),
                is_client: false,
            },
        );
        stats.handle_rpc(
            &stats_ctx,
            &RpcStats::Begin {
                is_client: false,
                client_stream: desc.client_streams,
                server_stream: desc.server_streams,
            },
        );

        let call_ctx = stats_ctx.child();
        let _cancel_on_exit = call_ctx.token().clone().drop_guard();

        let info = Arc::new(StreamServerInfo {
            full_method: full_method.to_string(),
            is_client_stream: desc.client_streams,
            is_server_stream: desc.server_streams,
            server: Arc::clone(&entry.server),
        });
        let call_stream: Arc<dyn ServerStream> = Arc::new(CallStream::new(
            Arc::clone(&stream),
            call_ctx.clone(),
            Arc::clone(stats),
        ));
        let bound = Arc::clone(&desc.handler);
        let handler = StreamHandler::new(move |s| bound(s));

        let call = async {
            stream.start(desc.client_streams, desc.server_streams).await?;
            self.inner.stream_chain.call(call_stream, info, handler).await
        };
        let result = AssertUnwindSafe(call)
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_status(full_method, panic)));

        let error = result.as_ref().err().cloned();
        guard.finish(result.map(|_| None)).await;

        stats.handle_rpc(
            &call_ctx,
            &RpcStats::End {
                full_method: full_method.to_string(),
                elapsed: begin.elapsed(),
                error,
            },
        );
    }

    /// 把调用期间写入的 header / trailer 交给传输层
    fn flush_metadata(&self, stream: &Arc<dyn ServerStream>, call_ctx: &Context) {
        let Some(scope) = call_ctx.scope() else {
            return;
        };

        let header = scope.header();
        if !header.is_empty() {
            match stream.set_header(header.clone()) {
                Ok(()) => self
                    .inner
                    .stats
                    .handle_rpc(call_ctx, &RpcStats::OutHeader { header }),
                Err(status) => warn!(method = %stream.method(), error = %status, "Failed to set header"),
            }
        }

        let trailer = scope.trailer();
        if !trailer.is_empty() {
            stream.set_trailer(trailer.clone());
            self.inner
                .stats
                .handle_rpc(call_ctx, &RpcStats::OutTrailer { trailer });
        }
    }

    /// 已注册的服务数量
    pub fn service_count(&self) -> usize {
        self.inner.services.len()
    }
}

fn panic_status(full_method: &str, panic: Box<dyn Any + Send>) -> Status {
    let reason = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(method = %full_method, panic = %reason, "Handler panicked");
    Status::internal(format!("panic in handler: {}", reason))
}

/// 保证流恰好结束一次
///
/// 分发过程被中途丢弃（监听器强制退出等）时，在后台补发 `Cancelled`。
struct FinishGuard {
    stream: Arc<dyn ServerStream>,
    finished: bool,
}

impl FinishGuard {
    fn new(stream: Arc<dyn ServerStream>) -> Self {
        Self {
            stream,
            finished: false,
        }
    }

    async fn finish(&mut self, result: Result<Option<Bytes>, Status>) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.stream.finish(result).await;
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let stream = Arc::clone(&self.stream);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                stream.finish(Err(Status::cancelled("call aborted"))).await;
            });
        }
    }
}
