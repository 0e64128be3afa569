//! Latch API - gRPC service definitions for the lock service
//!
//! This crate provides:
//! - The `LockService` gRPC service (generated from proto)
//! - Request/response message types and the wire error-code enum
//! - Shared protocol constants

pub mod grpc;
pub mod model;

// Re-export commonly used types
pub use grpc::latch::*;
pub use model::*;
