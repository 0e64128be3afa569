//! Latch Core - server-side services for the Latch lock service
//!
//! This crate provides the keyed expiration registry that backs lock
//! lease timeouts: the lock state machine registers a force-release
//! callback per held lease, and a client renewal resets the deadline.

pub mod expiry;

pub use expiry::{ExpirationRegistry, ExpiryError};
