//! Generated gRPC bindings for the `latch` proto package.

#[allow(clippy::all)]
pub mod latch {
    include!(concat!(env!("OUT_DIR"), "/latch.rs"));
}
