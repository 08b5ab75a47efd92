//! 指标收集模块

use super::{RpcStats, StatsHandler};
use crate::metadata::Context;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// 保留的最近请求耗时数量
const DURATION_WINDOW: usize = 1000;

/// 单个方法的指标
#[derive(Debug, Clone, Default, Serialize)]
pub struct MethodMetrics {
    pub requests_total: u64,
    pub requests_failed: u64,
}

/// 指标数据
#[derive(Debug, Clone, Default, Serialize)]
pub struct Metrics {
    pub requests_total: u64,
    pub requests_success: u64,
    pub requests_failed: u64,
    pub request_duration_ms: VecDeque<u64>,
    pub methods: HashMap<String, MethodMetrics>,
}

impl Metrics {
    /// 最近窗口内的平均耗时（毫秒）
    pub fn average_duration_ms(&self) -> Option<f64> {
        if self.request_duration_ms.is_empty() {
            return None;
        }
        let sum: u64 = self.request_duration_ms.iter().sum();
        Some(sum as f64 / self.request_duration_ms.len() as f64)
    }
}

/// 指标收集器
#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: Arc<Mutex<Metrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, method: &str, success: bool, duration: Duration) {
        let mut metrics = self.metrics.lock();
        metrics.requests_total += 1;

        if success {
            metrics.requests_success += 1;
        } else {
            metrics.requests_failed += 1;
        }

        metrics
            .request_duration_ms
            .push_back(duration.as_millis() as u64);
        if metrics.request_duration_ms.len() > DURATION_WINDOW {
            metrics.request_duration_ms.pop_front();
        }

        let entry = metrics.methods.entry(method.to_string()).or_default();
        entry.requests_total += 1;
        if !success {
            entry.requests_failed += 1;
        }
    }

    pub fn get_metrics(&self) -> Metrics {
        self.metrics.lock().clone()
    }
}

/// 指标统计处理器
pub struct MetricsStatsHandler {
    collector: MetricsCollector,
}

impl MetricsStatsHandler {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }

    pub fn collector(&self) -> MetricsCollector {
        self.collector.clone()
    }
}

impl StatsHandler for MetricsStatsHandler {
    fn handle_rpc(&self, _ctx: &Context, stats: &RpcStats) {
        if let RpcStats::End {
            full_method,
            elapsed,
            error,
        } = stats
        {
            self.collector
                .record_request(full_method, error.is_none(), *elapsed);
        }
    }
}
