//! 消息编解码
//!
//! 注册服务时为每个方法提供强类型编解码器，分发器只处理字节，
//! 拦截器链只处理类型擦除后的消息。

use crate::error::Status;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// 强类型编解码器
///
/// 同一个编解码器值通常同时实现请求类型与响应类型的 `Codec<T>`。
pub trait Codec<T>: Send + Sync + 'static {
    /// 编解码器名称（如 `json`、`proto`）
    fn name(&self) -> &'static str;

    /// 编码，失败映射为 `Internal`
    fn encode(&self, item: &T) -> Result<Bytes, Status>;

    /// 解码，失败映射为 `InvalidArgument`
    fn decode(&self, buf: Bytes) -> Result<T, Status>;
}

/// JSON 编解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Codec<T> for JsonCodec
where
    T: Serialize + DeserializeOwned,
{
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, item: &T) -> Result<Bytes, Status> {
        serde_json::to_vec(item)
            .map(Bytes::from)
            .map_err(|e| Status::internal(format!("json encode failed: {}", e)))
    }

    fn decode(&self, buf: Bytes) -> Result<T, Status> {
        serde_json::from_slice(&buf)
            .map_err(|e| Status::invalid_argument(format!("json decode failed: {}", e)))
    }
}

/// Protobuf 编解码器
#[derive(Debug, Clone, Copy, Default)]
pub struct ProstCodec;

impl<T> Codec<T> for ProstCodec
where
    T: prost::Message + Default,
{
    fn name(&self) -> &'static str {
        "proto"
    }

    fn encode(&self, item: &T) -> Result<Bytes, Status> {
        Ok(Bytes::from(item.encode_to_vec()))
    }

    fn decode(&self, buf: Bytes) -> Result<T, Status> {
        T::decode(buf).map_err(|e| Status::invalid_argument(format!("proto decode failed: {}", e)))
    }
}
