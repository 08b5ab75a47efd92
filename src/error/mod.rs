//! Flare RPC Core 错误处理模块
//!
//! 错误分为两层：
//! - 调用级：[`Status`]，只影响单次调用，随 `finish` 返回给调用方
//! - 生命周期级：[`Error`]，影响整个进程能否继续服务（监听器启停、注册中心、配置）

pub mod code;
pub mod grpc;
pub mod status;

pub use code::Code;
pub use status::Status;

use thiserror::Error;

/// 动态错误类型（外部协作方返回的错误）
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 生命周期 / 配置错误
#[derive(Error, Debug)]
pub enum Error {
    /// 重复注册同名服务（构建期接线错误）
    #[error("duplicate service registration: {0}")]
    DuplicateService(String),

    /// 服务器已启动，不再接受服务注册
    #[error("server already started, cannot register service {0}")]
    ServerStarted(String),

    /// 服务器已关闭
    #[error("server is closed")]
    ServerClosed,

    /// 协议未注册
    #[error("protocol not registered: {0}")]
    ProtocolNotFound(String),

    /// 协议监听器错误
    #[error("protocol {protocol} at {address}: {source}")]
    Protocol {
        protocol: String,
        address: String,
        #[source]
        source: BoxError,
    },

    /// 注册中心错误
    #[error("registry {registry}: {source}")]
    Registry {
        registry: String,
        #[source]
        source: BoxError,
    },

    /// 配置错误
    #[error("config error: {0}")]
    Config(String),

    /// IO 错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 内部任务错误（钩子、内部服务器等）
    #[error("{0}")]
    Internal(String),

    /// 多个错误聚合
    #[error("{}", join_messages(.0))]
    Aggregate(Vec<Error>),
}

impl Error {
    /// 创建协议错误
    pub fn protocol(
        protocol: impl Into<String>,
        address: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Error::Protocol {
            protocol: protocol.into(),
            address: address.into(),
            source: source.into(),
        }
    }

    /// 创建注册中心错误
    pub fn registry(registry: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Error::Registry {
            registry: registry.into(),
            source: source.into(),
        }
    }

    /// 创建内部错误
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// 合并错误列表：空列表返回 `None`，单个错误原样返回，多个错误聚合
    pub fn join(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Aggregate(errors)),
        }
    }

    /// 展开聚合错误
    pub fn flatten(self) -> Vec<Error> {
        match self {
            Error::Aggregate(errors) => errors.into_iter().flat_map(Error::flatten).collect(),
            other => vec![other],
        }
    }
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// 生命周期操作结果类型
pub type Result<T> = std::result::Result<T, Error>;
