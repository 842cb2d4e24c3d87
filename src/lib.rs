//! Ferry - authenticated file transfer over gRPC
//!
//! This crate implements a small remote file store with four call shapes:
//! a unary listing, a server-streaming download, a client-streaming upload
//! and a bidirectional upload that reports progress after every chunk.
//!
//! The pieces, leaves first:
//!
//! - [`chunk`] frames bytes into bounded [`Chunk`]s
//! - [`store`] is the only code that touches the filesystem
//! - [`engine`] runs the four operations over abstract streams
//! - [`auth`] validates the bearer credential before any call runs
//! - [`server`] and [`client`] wire it all to `tonic` and TLS
//!
//! # Server Example
//!
//! ```rust,no_run
//! use ferry::server::{ServerOptions, serve};
//! use ferry::server::transport::load_identity;
//! use ferry::{Credential, LocalStore, TransferEngine};
//!
//! #[tokio::main]
//! async fn main() -> ferry::Result<()> {
//!     let engine = TransferEngine::new(LocalStore::new("./storage"));
//!     let options = ServerOptions::new(Credential::new("test-token")).identity(
//!         load_identity("ssl/localhost.pem".as_ref(), "ssl/localhost-key.pem".as_ref())?,
//!     );
//!
//!     let addr = "127.0.0.1:50051".parse().unwrap();
//!     serve(addr, engine, options, std::future::pending()).await
//! }
//! ```
//!
//! # Client Example
//!
//! ```rust,no_run
//! use ferry::client::{ClientOptions, FileClient};
//! use ferry::Credential;
//!
//! #[tokio::main]
//! async fn main() -> ferry::Result<()> {
//!     let options = ClientOptions::new("https://localhost:50051")
//!         .ca_certificate_file("rootCA.pem")?
//!         .credential(Credential::new("test-token"));
//!     let client = FileClient::connect(options).await?;
//!
//!     for name in client.list().await? {
//!         println!("{name}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod chunk;
#[cfg(feature = "client")]
pub mod client;
pub mod engine;
pub mod error;
pub mod server;
pub mod store;
pub mod telemetry;
mod version;

// Re-export main types at crate root
pub use auth::{BearerAuth, CallLogger, CallMiddleware, Credential, MiddlewareChain};
pub use chunk::{Chunk, ChunkReader, ChunkSize, frame};
pub use engine::{CallContext, Progress, ProgressUpload, TransferEngine, TransferPolicy};
pub use error::{Result, TransferError};
pub use store::{FileName, FileStore, LocalStore};
pub use version::{PKG_VERSION, version_string};
