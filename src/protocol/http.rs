//! HTTP 协议
//!
//! `POST /{service}/{method}`，请求体为编码后的请求消息，请求头作为入站元数据。
//! 成功时响应体为编码后的响应消息；失败时响应体为 `{"code", "message"}`，
//! HTTP 状态码按错误码映射。header 原样写入响应头，trailer 加 `trailer-` 前缀。
//! 只支持一元调用。

use super::{Builder, Listener, ListenerInfo, ProtocolConfig};
use crate::error::{Error, Result, Status};
use crate::metadata::{Context, Metadata};
use crate::server::{MethodHandle, ServerStream};
use async_trait::async_trait;
use axum::Router;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub const PROTOCOL_NAME: &str = "http";
/// 响应错误码头
pub const CODE_HEADER: &str = "x-rpc-code";
/// trailer 写入响应头时的前缀
pub const TRAILER_PREFIX: &str = "trailer-";

/// HTTP 协议构建器
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpBuilder;

impl HttpBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl Builder for HttpBuilder {
    fn name(&self) -> &str {
        PROTOCOL_NAME
    }

    fn build(&self, config: &ProtocolConfig, handle: MethodHandle) -> Result<Arc<dyn Listener>> {
        Ok(Arc::new(HttpListener {
            config: config.clone(),
            handle,
            listener: tokio::sync::Mutex::new(None),
            local_addr: Mutex::new(None),
            shutdown: CancellationToken::new(),
        }))
    }
}

struct HttpListener {
    config: ProtocolConfig,
    handle: MethodHandle,
    listener: tokio::sync::Mutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: CancellationToken,
}

#[async_trait]
impl Listener for HttpListener {
    async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.address)
            .await
            .map_err(|e| Error::protocol(PROTOCOL_NAME, &self.config.address, e))?;
        *self.local_addr.lock() = listener.local_addr().ok();
        *self.listener.lock().await = Some(listener);
        Ok(())
    }

    async fn handle(&self) -> Result<()> {
        let Some(listener) = self.listener.lock().await.take() else {
            return Err(Error::protocol(
                PROTOCOL_NAME,
                &self.config.address,
                "listener not started",
            ));
        };

        let router = Router::new()
            .route("/{service}/{method}", post(handle_call))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(self.handle.clone());

        let address = self.info().address;
        info!(address = %address, "HTTP listener serving");
        axum::serve(listener, router)
            .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
            .await
            .map_err(|e| Error::protocol(PROTOCOL_NAME, address, e))
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }

    fn info(&self) -> ListenerInfo {
        let bound = *self.local_addr.lock();
        let address = bound
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| self.config.address.clone());
        ListenerInfo {
            protocol: PROTOCOL_NAME.to_string(),
            address,
            attributes: self.config.attributes.clone(),
        }
    }
}

async fn handle_call(
    State(dispatcher): State<MethodHandle>,
    Path((service, method)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (tx, rx) = oneshot::channel();
    let stream = Arc::new(HttpServerStream {
        ctx: Context::new().with_inbound(metadata_from_headers(&headers)),
        method: format!("/{}/{}", service, method),
        body: Mutex::new(Some(body)),
        header: Mutex::new(Metadata::new()),
        trailer: Mutex::new(Metadata::new()),
        outcome: Mutex::new(Some(tx)),
    });

    dispatcher.handle(stream).await;

    let outcome = rx.await.unwrap_or_else(|_| CallOutcome {
        header: Metadata::new(),
        trailer: Metadata::new(),
        result: Err(Status::internal("call finished without a result")),
    });
    outcome.into_response()
}

fn metadata_from_headers(headers: &HeaderMap) -> Metadata {
    let mut md = Metadata::new();
    for (name, value) in headers {
        match value.to_str() {
            Ok(value) => md.append(name.as_str(), [value]),
            Err(_) => debug!(header = %name, "Skipping non-ascii header"),
        }
    }
    md
}

fn append_metadata(headers: &mut HeaderMap, md: &Metadata, prefix: &str) {
    for (key, values) in md {
        let Ok(name) = HeaderName::from_bytes(format!("{}{}", prefix, key).as_bytes()) else {
            debug!(key = %key, "Skipping invalid header name");
            continue;
        };
        for value in values {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(name.clone(), value);
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: i32,
    message: &'a str,
}

struct CallOutcome {
    header: Metadata,
    trailer: Metadata,
    result: std::result::Result<Option<Bytes>, Status>,
}

impl IntoResponse for CallOutcome {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        append_metadata(&mut headers, &self.header, "");
        append_metadata(&mut headers, &self.trailer, TRAILER_PREFIX);

        match self.result {
            Ok(body) => {
                headers.insert(CODE_HEADER, HeaderValue::from_static("0"));
                (StatusCode::OK, headers, body.unwrap_or_default()).into_response()
            }
            Err(status) => {
                let code = status.code();
                let http_status = StatusCode::from_u16(code.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                headers.insert(CODE_HEADER, HeaderValue::from(code.as_i32()));
                let body = ErrorBody {
                    code: code.as_i32(),
                    message: status.message(),
                };
                (http_status, headers, axum::Json(body)).into_response()
            }
        }
    }
}

struct HttpServerStream {
    ctx: Context,
    method: String,
    body: Mutex<Option<Bytes>>,
    header: Mutex<Metadata>,
    trailer: Mutex<Metadata>,
    outcome: Mutex<Option<oneshot::Sender<CallOutcome>>>,
}

#[async_trait]
impl ServerStream for HttpServerStream {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn method(&self) -> &str {
        &self.method
    }

    async fn start(
        &self,
        client_streaming: bool,
        server_streaming: bool,
    ) -> std::result::Result<(), Status> {
        if client_streaming || server_streaming {
            return Err(Status::unimplemented(format!(
                "streaming method {} is not supported over http",
                self.method
            )));
        }
        Ok(())
    }

    async fn recv_msg(&self) -> std::result::Result<Option<Bytes>, Status> {
        Ok(self.body.lock().take())
    }

    async fn send_msg(&self, _msg: Bytes) -> std::result::Result<(), Status> {
        Err(Status::internal("http listener does not stream responses"))
    }

    fn set_header(&self, md: Metadata) -> std::result::Result<(), Status> {
        self.header.lock().merge(&md);
        Ok(())
    }

    fn set_trailer(&self, md: Metadata) {
        self.trailer.lock().merge(&md);
    }

    async fn finish(&self, result: std::result::Result<Option<Bytes>, Status>) {
        let Some(tx) = self.outcome.lock().take() else {
            return;
        };
        let outcome = CallOutcome {
            header: std::mem::take(&mut *self.header.lock()),
            trailer: std::mem::take(&mut *self.trailer.lock()),
            result,
        };
        let _ = tx.send(outcome);
    }
}
