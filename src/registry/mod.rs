//! 服务注册模块
//!
//! 核心只定义注册中心接口，具体后端由宿主实现并通过 `with_registry` 注入。

mod instance;

pub use instance::{Endpoint, Instance};

use crate::error::BoxError;
use crate::metadata::Context;
use async_trait::async_trait;

/// 注册中心
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    /// 注册中心名称，用于日志与错误信息
    fn name(&self) -> &str;

    /// 注册服务实例
    async fn register(&self, ctx: &Context, instance: &Instance) -> Result<(), BoxError>;

    /// 注销服务实例
    async fn deregister(&self, ctx: &Context, instance: &Instance) -> Result<(), BoxError>;
}
