//! gRPC 错误处理
//!
//! 提供 `Status` 与 `tonic::Status` 之间的转换，供 gRPC 协议实现直接使用

use super::{Code, Status};

impl From<Code> for tonic::Code {
    fn from(code: Code) -> Self {
        tonic::Code::from_i32(code.as_i32())
    }
}

impl From<tonic::Code> for Code {
    fn from(code: tonic::Code) -> Self {
        Code::from_i32(code as i32)
    }
}

impl From<Status> for tonic::Status {
    fn from(status: Status) -> Self {
        let mut grpc = tonic::Status::new(status.code().into(), status.message());

        // 详细信息放入 metadata
        if let Some(details) = status.details() {
            if let Ok(value) = details.parse() {
                grpc.metadata_mut().insert("error-details", value);
            }
        }

        grpc
    }
}

impl From<tonic::Status> for Status {
    fn from(status: tonic::Status) -> Self {
        let details = status
            .metadata()
            .get("error-details")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let converted = Status::new(status.code().into(), status.message());
        match details {
            Some(details) => converted.with_details(details),
            None => converted,
        }
    }
}
