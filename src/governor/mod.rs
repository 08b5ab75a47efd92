//! 管理端口
//!
//! 独立的 HTTP 监听器，暴露服务表、监听器、路由、健康状态与调用指标。

use crate::health::{HealthService, HealthStatus};
use crate::runtime::InternalServer;
use crate::server::Server;
use crate::stats::MetricsCollector;
use anyhow::Context as _;
use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
struct GovernorState {
    server: Arc<Server>,
    health: HealthService,
    metrics: Option<MetricsCollector>,
}

/// HTTP 路由表项
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: String,
    pub path: String,
}

#[derive(Serialize)]
struct HealthBody {
    status: HealthStatus,
    services: HashMap<String, HealthStatus>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
}

/// 管理端口服务器
pub struct Governor {
    address: String,
    state: GovernorState,
    bound: watch::Sender<Option<SocketAddr>>,
    shutdown: CancellationToken,
}

impl Governor {
    pub fn new(
        address: impl Into<String>,
        server: Arc<Server>,
        health: HealthService,
        metrics: Option<MetricsCollector>,
    ) -> Self {
        let (bound, _) = watch::channel(None);
        Self {
            address: address.into(),
            state: GovernorState {
                server,
                health,
                metrics,
            },
            bound,
            shutdown: CancellationToken::new(),
        }
    }

    /// 已绑定的地址
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.borrow()
    }

    /// 等待绑定完成，服务器在绑定前退出时返回 `None`
    pub async fn wait_bound(&self) -> Option<SocketAddr> {
        let mut rx = self.bound.subscribe();
        tokio::select! {
            result = rx.wait_for(Option::is_some) => result.ok().and_then(|addr| *addr),
            _ = self.shutdown.cancelled() => self.local_addr(),
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/services", get(list_services))
            .route("/listeners", get(list_listeners))
            .route("/routes", get(list_routes))
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(self.state.clone())
    }
}

#[async_trait]
impl InternalServer for Governor {
    fn name(&self) -> &str {
        "governor"
    }

    async fn serve(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("failed to bind governor on {}", self.address))?;
        let addr = listener.local_addr()?;
        self.bound.send_replace(Some(addr));
        info!(address = %addr, "🚀 Governor listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(self.shutdown.clone().cancelled_owned())
            .await
            .context("governor server failed")?;

        info!(address = %addr, "Governor stopped");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.shutdown.cancel();
        Ok(())
    }
}

async fn list_services(State(state): State<GovernorState>) -> impl IntoResponse {
    Json(state.server.service_infos())
}

async fn list_listeners(State(state): State<GovernorState>) -> impl IntoResponse {
    Json(state.server.listener_infos())
}

async fn list_routes(State(state): State<GovernorState>) -> impl IntoResponse {
    let routes: Vec<RouteInfo> = state
        .server
        .service_infos()
        .into_iter()
        .flat_map(|service| {
            service.methods.into_iter().map(move |method| RouteInfo {
                method: "POST".to_string(),
                path: format!("/{}/{}", service.name, method),
            })
        })
        .collect();
    Json(routes)
}

async fn health(State(state): State<GovernorState>) -> Response {
    let status = state.health.overall();
    let body = HealthBody {
        status,
        services: state.health.snapshot().await,
        timestamp: Utc::now(),
    };
    let code = if status == HealthStatus::Serving {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

async fn metrics(State(state): State<GovernorState>) -> Response {
    match state.metrics {
        Some(collector) => Json(collector.get_metrics()).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics stats handler not enabled").into_response(),
    }
}
