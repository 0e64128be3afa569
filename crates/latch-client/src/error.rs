//! Client error types for the Latch SDK

use latch_api::grpc::latch::{Error as RpcError, ErrorCode};

/// Error type for Latch client operations.
///
/// Transport-level failures (`Rpc`, `Transport`) are distinct from the
/// closed set of service-level rejections carried in response bodies;
/// only the former are ever retried, and only when the status code is
/// `Unavailable`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("gRPC error: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("lock does not exist")]
    LockDoesNotExist,

    #[error("invalid lock key")]
    InvalidLockKey,

    #[error("timed out waiting for lock")]
    LockWaitTimeout,

    #[error("lock is not locked")]
    NotLocked,

    #[error("lock does not exist or invalid lock key")]
    LockDoesNotExistOrInvalidKey,

    #[error("lock size mismatch")]
    LockSizeMismatch,

    #[error("invalid lock size")]
    InvalidLockSize,

    #[error("wait timeout cannot be used with try_acquire")]
    WaitTimeoutNotAllowed,

    #[error("server returned error: code={code}, message={message}")]
    Server { code: i32, message: String },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    /// Translate a service-level rejection into its typed error.
    /// Unrecognized codes keep the original code and message.
    pub(crate) fn from_rpc_error(err: RpcError) -> Self {
        match ErrorCode::try_from(err.code) {
            Ok(ErrorCode::LockDoesNotExist) => Self::LockDoesNotExist,
            Ok(ErrorCode::InvalidLockKey) => Self::InvalidLockKey,
            Ok(ErrorCode::LockWaitTimeout) => Self::LockWaitTimeout,
            Ok(ErrorCode::NotLocked) => Self::NotLocked,
            Ok(ErrorCode::LockDoesNotExistOrInvalidKey) => Self::LockDoesNotExistOrInvalidKey,
            Ok(ErrorCode::LockSizeMismatch) => Self::LockSizeMismatch,
            Ok(ErrorCode::InvalidLockSize) => Self::InvalidLockSize,
            Ok(ErrorCode::Unknown) | Err(_) => Self::Server {
                code: err.code,
                message: err.message,
            },
        }
    }
}
