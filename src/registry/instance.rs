//! 服务实例定义

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 服务实例
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    /// 实例 ID（唯一标识）
    pub id: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub region: String,
    pub zone: String,
    pub campus: String,
    /// 自定义元数据
    pub metadata: HashMap<String, String>,
    /// 对外暴露的监听端点
    pub endpoints: Vec<Endpoint>,
}

/// 服务端点
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    /// 协议名，如 `http`、`inproc`
    pub scheme: String,
    pub attributes: HashMap<String, String>,
}

impl Instance {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 设置地域信息
    pub fn with_location(
        mut self,
        region: impl Into<String>,
        zone: impl Into<String>,
        campus: impl Into<String>,
    ) -> Self {
        self.region = region.into();
        self.zone = zone.into();
        self.campus = campus.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// 查找指定协议的端点
    pub fn endpoint(&self, scheme: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.scheme == scheme)
    }
}

impl Endpoint {
    pub fn new(scheme: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            scheme: scheme.into(),
            attributes: HashMap::new(),
        }
    }

    /// 转换为 URL
    pub fn to_url(&self) -> String {
        format!("{}://{}", self.scheme, self.address)
    }
}
