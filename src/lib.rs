//! Flare RPC Core Library
//!
//! 多协议 RPC 运行时核心：应用生命周期编排、多协议服务端分发、拦截器链、
//! 调用级元数据上下文与统计处理器。

pub mod client;
pub mod codec;
pub mod config;
pub mod error;
pub mod governor;
pub mod health;
pub mod interceptor;
pub mod logging;
pub mod metadata;
pub mod plugin;
pub mod protocol;
pub mod registry;
pub mod runtime;
pub mod server;
pub mod stats;

// Re-exports
pub use client::{Client, ClientOptions, ClientStream, ClientStreamDesc, ClientTransport};
pub use codec::{Codec, JsonCodec, ProstCodec};
pub use config::Config;
pub use error::{BoxError, Code, Error, Result, Status};
pub use metadata::{CallScope, Context, Metadata};
pub use plugin::Plugins;
pub use runtime::{Application, HookStage, InternalServer, RegistryState};
pub use server::{MethodDesc, Server, ServerOptions, ServiceDesc, StreamDesc};
