//! 健康检查模块

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Unknown,
    Serving,
    NotServing,
}

/// 健康检查服务
///
/// 按服务名记录状态，另有一个进程级的整体状态。
#[derive(Clone, Default)]
pub struct HealthService {
    statuses: Arc<RwLock<HashMap<String, HealthStatus>>>,
    serving: Arc<AtomicBool>,
}

impl HealthService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_status(&self, service: impl Into<String>, status: HealthStatus) {
        let mut statuses = self.statuses.write().await;
        statuses.insert(service.into(), status);
    }

    pub async fn get_status(&self, service: &str) -> HealthStatus {
        let statuses = self.statuses.read().await;
        statuses
            .get(service)
            .copied()
            .unwrap_or(HealthStatus::Unknown)
    }

    /// 整体状态
    pub fn overall(&self) -> HealthStatus {
        if self.serving.load(Ordering::Acquire) {
            HealthStatus::Serving
        } else {
            HealthStatus::NotServing
        }
    }

    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::Acquire)
    }

    /// 标记给定服务与整体状态为 `Serving`
    pub async fn set_serving<I, S>(&self, services: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut statuses = self.statuses.write().await;
        for service in services {
            statuses.insert(service.into(), HealthStatus::Serving);
        }
        self.serving.store(true, Ordering::Release);
    }

    /// 标记全部服务与整体状态为 `NotServing`
    pub async fn set_not_serving(&self) {
        self.serving.store(false, Ordering::Release);
        let mut statuses = self.statuses.write().await;
        for status in statuses.values_mut() {
            *status = HealthStatus::NotServing;
        }
    }

    /// 全部服务状态快照
    pub async fn snapshot(&self) -> HashMap<String, HealthStatus> {
        self.statuses.read().await.clone()
    }
}
