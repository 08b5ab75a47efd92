//! HTTP 协议与管理端口测试

mod common;

use common::{Greeter, SAY_HELLO, SERVICE, greeter_desc, serve_greeter, wait_until, within};
use flare_rpc_core::config::{Config, ProtocolConfig, ServerConfig};
use flare_rpc_core::plugin::Plugins;
use flare_rpc_core::protocol::http::{CODE_HEADER, TRAILER_PREFIX};
use flare_rpc_core::runtime::{Application, with_signal_handling};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;

fn http_options() -> ServerConfig {
    ServerConfig::default().with_protocol(ProtocolConfig::new("http", "127.0.0.1:0"))
}

fn header<'a>(response: &'a reqwest::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

/// 测试：HTTP 一元调用，header 与 trailer 写入响应头
#[tokio::test]
async fn test_http_unary_call() {
    let server = serve_greeter(http_options(), Plugins::with_builtins()).await;
    let listeners = server.server.listener_infos();
    assert_eq!(listeners.len(), 1);
    assert_eq!(listeners[0].protocol, "http");
    let address = listeners[0].address.clone();
    assert!(!address.ends_with(":0"), "address not resolved: {}", address);

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}{}", address, SAY_HELLO))
        .header("x-request-id", "req-1")
        .json(&json!({ "name": "Http" }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(header(&response, CODE_HEADER), Some("0"));
    assert_eq!(header(&response, "x-greeter"), Some("v1"));
    let trailer = format!("{}x-served-by", TRAILER_PREFIX);
    assert_eq!(header(&response, &trailer), Some("greeter"));

    let body: Value = response.json().await.expect("Failed to decode body");
    assert_eq!(body, json!({ "message": "Hello Http" }));
    assert_eq!(server.greeter.calls(), 1);

    server.shutdown().await;
}

/// 测试：HTTP 错误响应携带错误码与消息
#[tokio::test]
async fn test_http_errors() {
    let server = serve_greeter(http_options(), Plugins::with_builtins()).await;
    let address = server.server.listener_infos()[0].address.clone();
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/{}/Missing", address, SERVICE))
        .body("{}")
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_IMPLEMENTED);
    assert_eq!(header(&response, CODE_HEADER), Some("12"));
    let body: Value = response.json().await.expect("Failed to decode body");
    assert_eq!(body["code"], 12);
    assert_eq!(
        body["message"],
        format!("unknown method Missing for service {}", SERVICE)
    );

    let response = client
        .post(format!("http://{}{}", address, SAY_HELLO))
        .json(&json!({ "name": "" }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.expect("Failed to decode body");
    assert_eq!(body, json!({ "code": 3, "message": "name is required" }));

    // 流式方法不支持 HTTP
    let response = client
        .post(format!("http://{}/{}/Chat", address, SERVICE))
        .body("{}")
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), reqwest::StatusCode::NOT_IMPLEMENTED);

    server.shutdown().await;
}

/// 测试：停止后 HTTP 端口不再接受连接
#[tokio::test]
async fn test_http_stop_closes_port() {
    let server = serve_greeter(http_options(), Plugins::with_builtins()).await;
    let address = server.server.listener_infos()[0].address.clone();
    server.shutdown().await;

    let result = reqwest::Client::new()
        .post(format!("http://{}{}", address, SAY_HELLO))
        .json(&json!({ "name": "late" }))
        .send()
        .await;
    assert!(result.is_err());
}

struct GovernedApp {
    app: Application,
    governor: SocketAddr,
    running: tokio::task::JoinHandle<flare_rpc_core::Result<()>>,
}

async fn run_governed(stats_handlers: &[&str]) -> GovernedApp {
    let mut config = Config::default();
    config.server = http_options().with_stats_handlers(stats_handlers.iter().copied());
    config.governor.enabled = true;
    config.governor.address = "127.0.0.1:0".to_string();

    let app = Application::new(config, Arc::new(Plugins::with_builtins()));
    app.init([with_signal_handling(false)]);
    app.try_register_service(greeter_desc(), Arc::new(Greeter::default()))
        .expect("Failed to register greeter");

    let running = {
        let app = app.clone();
        tokio::spawn(async move { app.run().await })
    };
    let governor = within(
        "governor bind",
        app.governor().expect("governor not enabled").wait_bound(),
    )
    .await
    .expect("governor did not bind");
    wait_until("health serving", || app.health().is_serving()).await;

    GovernedApp {
        app,
        governor,
        running,
    }
}

impl GovernedApp {
    async fn get(&self, path: &str) -> reqwest::Response {
        reqwest::get(format!("http://{}{}", self.governor, path))
            .await
            .expect("Failed to query governor")
    }

    async fn shutdown(self) {
        self.app.stop().await.expect("Failed to stop application");
        within("run to return", self.running)
            .await
            .expect("Run task panicked")
            .expect("Run returned an error");
    }
}

/// 测试：管理端口暴露服务表、路由与健康状态
#[tokio::test]
async fn test_governor_endpoints() {
    let governed = run_governed(&[]).await;

    let services: Value = governed
        .get("/services")
        .await
        .json()
        .await
        .expect("Failed to decode services");
    assert_eq!(services[0]["name"], SERVICE);
    assert_eq!(services[0]["metadata"], "helloworld.proto");
    assert_eq!(services[0]["methods"], json!(["SayHello"]));
    assert_eq!(services[0]["streams"].as_array().map(Vec::len), Some(3));

    let routes: Value = governed
        .get("/routes")
        .await
        .json()
        .await
        .expect("Failed to decode routes");
    assert_eq!(routes, json!([{ "method": "POST", "path": SAY_HELLO }]));

    let listeners: Value = governed
        .get("/listeners")
        .await
        .json()
        .await
        .expect("Failed to decode listeners");
    assert_eq!(listeners[0]["protocol"], "http");

    let health = governed.get("/health").await;
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    let health: Value = health.json().await.expect("Failed to decode health");
    assert_eq!(health["status"], "SERVING");
    assert_eq!(health["services"], json!({ SERVICE: "SERVING" }));
    assert!(health["timestamp"].as_i64().is_some_and(|ts| ts > 0));

    let metrics = governed.get("/metrics").await;
    assert_eq!(metrics.status(), reqwest::StatusCode::NOT_FOUND);

    governed.shutdown().await;
}

/// 测试：启用 metrics 处理器后管理端口返回调用指标
#[tokio::test]
async fn test_governor_metrics() {
    let governed = run_governed(&["metrics"]).await;

    let address = governed.app.server().listener_infos()[0].address.clone();
    let response = reqwest::Client::new()
        .post(format!("http://{}{}", address, SAY_HELLO))
        .json(&json!({ "name": "Metrics" }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    // End 事件在响应写出之后上报
    let metrics = within("metrics to be recorded", async {
        loop {
            let response = governed.get("/metrics").await;
            assert_eq!(response.status(), reqwest::StatusCode::OK);
            let metrics: Value = response.json().await.expect("Failed to decode metrics");
            if metrics["requests_total"] == 1 {
                return metrics;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    assert_eq!(metrics["requests_success"], 1);
    assert_eq!(metrics["methods"][SAY_HELLO]["requests_total"], 1);

    governed.shutdown().await;
}
