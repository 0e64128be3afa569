//! Latch Client - Rust SDK for the Latch lock service
//!
//! This crate provides:
//! - A session façade over the lock service gRPC API
//! - Transparent lease auto-renewal for held locks
//! - Fixed-delay retry of transient transport failures
//! - A typed error taxonomy for service-level rejections

pub mod config;
pub mod error;
pub mod session;

mod renewal;
mod retry;
mod transport;

pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use session::{AcquireOptions, Lock, Session};
