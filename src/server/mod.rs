//! gRPC server and shared proto types.
//!
//! This module provides:
//! - Generated protobuf types (`proto`) used by both server and client
//! - Type conversions between native and proto types (`convert`)
//! - The gRPC service adapter over the engine (`service`, server-only)
//! - TLS endpoint and middleware wiring (`transport`, server-only)
//! - Configuration types (`config`, server-only)

#[cfg(feature = "server")]
pub mod config;
pub mod convert;
#[cfg(feature = "server")]
pub mod service;
#[cfg(feature = "server")]
pub mod transport;

/// Re-exported generated proto types.
pub mod proto {
    tonic::include_proto!("ferry.v1");
}

#[cfg(feature = "server")]
pub use service::FileTransferService;
#[cfg(feature = "server")]
pub use transport::{ServerOptions, file_service, serve, serve_with_listener};
