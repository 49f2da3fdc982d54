//! gRPC gateway for the worker-pool matrix multiplier.
//!
//! Decodes `matmul.MatMul` requests into [`matrix_mul`] calls and maps core
//! errors onto gRPC status codes. All computation happens in `matrix-mul`;
//! this crate only owns the transport, configuration and process start-up.

pub mod config;
pub mod grpc;

pub use matmul_types::matmul as proto;
