//! Server endpoint wiring: TLS identity, middleware chain, listener.
//!
//! Owns no transfer logic. [`file_service`] puts the [`MiddlewareChain`]
//! in front of the generated `FileServiceServer`; [`serve`] and
//! [`serve_with_listener`] add TLS and run it until shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tracing::{info, warn};

use crate::auth::{Credential, MiddlewareChain};
use crate::engine::TransferEngine;
use crate::store::FileStore;
use crate::{Result, TransferError};

use super::proto::file_service_server::FileServiceServer;
use super::service::FileTransferService;

/// Everything the endpoint needs besides the engine.
#[derive(Clone)]
pub struct ServerOptions {
    /// Certificate chain and key; `None` serves plaintext.
    pub identity: Option<Identity>,
    /// Middleware run before every call, in order.
    pub middleware: MiddlewareChain,
    /// Upper bound on any call's duration.
    pub call_timeout: Option<Duration>,
    /// Maximum concurrent calls per connection.
    pub concurrency_limit: Option<usize>,
}

impl ServerOptions {
    /// Standard middleware (logging, then auth) and no TLS.
    pub fn new(expected: Credential) -> Self {
        Self {
            identity: None,
            middleware: MiddlewareChain::standard(expected),
            call_timeout: None,
            concurrency_limit: None,
        }
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn middleware(mut self, middleware: MiddlewareChain) -> Self {
        self.middleware = middleware;
        self
    }

    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn concurrency_limit(mut self, limit: Option<usize>) -> Self {
        self.concurrency_limit = limit;
        self
    }
}

/// Read a PEM certificate chain and private key from disk.
pub fn load_identity(cert: &Path, key: &Path) -> Result<Identity> {
    let read = |path: &Path| {
        std::fs::read(path).map_err(|e| {
            TransferError::Configuration(format!("Failed to read {}: {e}", path.display()))
        })
    };
    Ok(Identity::from_pem(read(cert)?, read(key)?))
}

/// The file service with the middleware chain in front of it.
pub fn file_service<S: FileStore>(
    engine: TransferEngine<S>,
    options: &ServerOptions,
) -> InterceptedService<FileServiceServer<FileTransferService<S>>, MiddlewareChain> {
    let service = FileTransferService::new(engine).with_call_timeout(options.call_timeout);
    FileServiceServer::with_interceptor(service, options.middleware.clone())
}

fn builder(options: &ServerOptions) -> Result<Server> {
    let mut builder = Server::builder();
    match &options.identity {
        Some(identity) => {
            builder = builder.tls_config(ServerTlsConfig::new().identity(identity.clone()))?;
        }
        None => warn!("serving without TLS; credentials travel in plaintext"),
    }
    if let Some(limit) = options.concurrency_limit {
        builder = builder.concurrency_limit_per_connection(limit);
    }
    Ok(builder)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve<S, F>(
    addr: SocketAddr,
    engine: TransferEngine<S>,
    options: ServerOptions,
    shutdown: F,
) -> Result<()>
where
    S: FileStore,
    F: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| TransferError::Transport(format!("failed to bind {addr}: {e}")))?;
    serve_with_listener(listener, engine, options, shutdown).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_with_listener<S, F>(
    listener: TcpListener,
    engine: TransferEngine<S>,
    options: ServerOptions,
    shutdown: F,
) -> Result<()>
where
    S: FileStore,
    F: Future<Output = ()> + Send,
{
    let local = listener.local_addr().ok();
    info!(
        addr = ?local,
        tls = options.identity.is_some(),
        middleware = ?options.middleware.names(),
        chunk_size = %engine.policy().chunk_size,
        "file service listening"
    );

    builder(&options)?
        .add_service(file_service(engine, &options))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await?;

    info!(addr = ?local, "file service stopped");
    Ok(())
}
