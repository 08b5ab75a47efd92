//! 配置模块
//!
//! 配置以 TOML 描述，所有字段都有默认值，空文档也是合法配置。

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub governor: GovernorConfig,
    pub log: LogConfig,
}

/// 应用身份与生命周期参数
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub region: String,
    pub zone: String,
    pub campus: String,
    pub instance_id: String,
    pub metadata: HashMap<String, String>,
    /// 优雅停机超时（秒）
    pub shutdown_timeout_secs: u64,
    /// 服务注册超时（秒）
    pub registry_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            name: "flare-app".to_string(),
            version: "0.0.0".to_string(),
            region: String::new(),
            zone: String::new(),
            campus: String::new(),
            instance_id: uuid::Uuid::new_v4().to_string(),
            metadata: HashMap::new(),
            shutdown_timeout_secs: 30,
            registry_timeout_secs: 5,
        }
    }
}

impl AppConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }
}

/// 单个协议监听配置
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProtocolConfig {
    /// 协议名，对应 `ProtocolRegistry` 中注册的构建器
    pub name: String,
    pub address: String,
    pub attributes: HashMap<String, String>,
}

impl ProtocolConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub protocols: Vec<ProtocolConfig>,
    pub unary_interceptors: Vec<String>,
    pub stream_interceptors: Vec<String>,
    pub stats_handlers: Vec<String>,
}

impl ServerConfig {
    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocols.push(protocol);
        self
    }

    pub fn with_unary_interceptors<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unary_interceptors = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stream_interceptors<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_interceptors = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stats_handlers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stats_handlers = names.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub unary_interceptors: Vec<String>,
    pub stream_interceptors: Vec<String>,
    pub stats_handlers: Vec<String>,
}

/// 管理端口配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub enabled: bool,
    pub address: String,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid toml: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验协议列表：名称与地址非空，(名称, 地址) 不重复
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for protocol in &self.server.protocols {
            if protocol.name.trim().is_empty() {
                return Err(Error::Config("protocol name must not be empty".to_string()));
            }
            if protocol.address.trim().is_empty() {
                return Err(Error::Config(format!(
                    "protocol {} has an empty address",
                    protocol.name
                )));
            }
            if !seen.insert((protocol.name.as_str(), protocol.address.as_str())) {
                return Err(Error::Config(format!(
                    "duplicate protocol {} on {}",
                    protocol.name, protocol.address
                )));
            }
        }
        Ok(())
    }
}
