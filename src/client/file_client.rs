//! [`FileClient`]: typed access to a remote ferryd over gRPC.
//!
//! All proto ↔ native conversions are centralized in [`crate::server::convert`];
//! status codes map back to [`TransferError`] through [`from_status`], so
//! callers can tell `NotFound` and `DeadlineExceeded` apart from the rest.
//!
//! # Uploading from a reader
//!
//! [`FileClient::upload`] and [`FileClient::upload_with_progress`] frame a
//! local [`AsyncRead`] into chunks on a separate task. A local read error
//! ends the outbound stream early and is reported after the call, since
//! the server has no way to learn about it.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Request;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::{Certificate, Channel, ClientTlsConfig};
use tracing::debug;

use crate::auth::{self, BearerCredential, Credential};
use crate::chunk::{Chunk, ChunkReader, ChunkSize};
use crate::engine::Progress;
use crate::error::from_status;
use crate::server::proto;
use crate::server::proto::file_service_client::FileServiceClient;
use crate::store::FileName;
use crate::{Result, TransferError};

/// Stream of downloaded chunks.
pub type DownloadStream = Pin<Box<dyn Stream<Item = Result<Chunk>> + Send>>;

/// Stream of progress notifications from the server.
pub type ProgressStream = Pin<Box<dyn Stream<Item = Result<Progress>> + Send>>;

/// How to reach and authenticate against a server.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Server URI, e.g. `https://localhost:50051`.
    pub address: String,
    /// PEM root certificate the server's chain must lead to.
    pub ca_certificate: Option<Vec<u8>>,
    /// Name checked against the server certificate (default: URI host).
    pub domain: Option<String>,
    /// Bearer token sent with every call.
    pub credential: Option<Credential>,
    /// Deadline applied to every call.
    pub timeout: Option<Duration>,
    /// Upload chunk size. Default: 64 KiB.
    pub chunk_size: ChunkSize,
    /// Delay between uploaded chunks. Default: none.
    pub pacing: Option<Duration>,
}

impl ClientOptions {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ca_certificate: None,
            domain: None,
            credential: None,
            timeout: None,
            chunk_size: ChunkSize::default(),
            pacing: None,
        }
    }

    pub fn ca_certificate(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_certificate = Some(pem.into());
        self
    }

    /// Read the root certificate from a PEM file.
    pub fn ca_certificate_file(self, path: impl AsRef<Path>) -> Result<Self> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let pem = std::fs::read(&path).map_err(|e| {
            TransferError::Configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        Ok(self.ca_certificate(pem))
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn chunk_size(mut self, size: ChunkSize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn pacing(mut self, delay: Duration) -> Self {
        self.pacing = Some(delay);
        self
    }
}

/// A client for the four file-transfer calls.
#[derive(Clone)]
pub struct FileClient {
    inner: FileServiceClient<InterceptedService<Channel, BearerCredential>>,
    timeout: Option<Duration>,
    chunk_size: ChunkSize,
    pacing: Option<Duration>,
}

impl FileClient {
    /// Connect to a ferryd server.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = FileClient::connect(
    ///     ClientOptions::new("https://localhost:50051")
    ///         .ca_certificate_file("rootCA.pem")?
    ///         .credential(Credential::new("test-token")),
    /// )
    /// .await?;
    /// ```
    pub async fn connect(options: ClientOptions) -> Result<Self> {
        let addr = options.address.clone();
        let mut endpoint = Channel::from_shared(addr.clone()).map_err(|e| {
            TransferError::Configuration(format!("invalid server address {addr}: {e}"))
        })?;

        if let Some(ca) = &options.ca_certificate {
            let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(ca));
            if let Some(domain) = &options.domain {
                tls = tls.domain_name(domain.clone());
            }
            endpoint = endpoint.tls_config(tls)?;
        }

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| TransferError::Transport(format!("failed to connect to {addr}: {e}")))?;

        let credential = match &options.credential {
            Some(credential) => BearerCredential::new(credential)?,
            None => BearerCredential::anonymous(),
        };

        Ok(Self {
            inner: FileServiceClient::with_interceptor(channel, credential),
            timeout: options.timeout,
            chunk_size: options.chunk_size,
            pacing: options.pacing,
        })
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(timeout) = self.timeout {
            request.set_timeout(timeout);
        }
        request
    }

    /// Names of the files the server holds.
    pub async fn list(&self) -> Result<Vec<String>> {
        let response = self
            .inner
            .clone()
            .list_files(self.request(proto::ListFilesRequest {}))
            .await
            .map_err(from_status)?;
        Ok(response.into_inner().filenames)
    }

    /// Start a download. Chunks already received remain valid if the
    /// stream later ends with an error.
    pub async fn download(&self, name: &str) -> Result<DownloadStream> {
        let request = self.request(proto::DownloadRequest {
            filename: name.to_string(),
        });
        let response = self
            .inner
            .clone()
            .download(request)
            .await
            .map_err(from_status)?;
        let stream = response
            .into_inner()
            .map(|result| result.map(Chunk::from).map_err(from_status));
        Ok(Box::pin(stream))
    }

    /// Download a whole file into memory.
    pub async fn download_to_vec(&self, name: &str) -> Result<Vec<u8>> {
        let mut contents = Vec::new();
        self.download_to(name, &mut contents).await?;
        Ok(contents)
    }

    /// Download into `writer`, returning the byte count.
    pub async fn download_to<W>(&self, name: &str, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stream = self.download(name).await?;
        let mut total = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer
                .write_all(chunk.as_bytes())
                .await
                .map_err(|e| TransferError::StoreUnavailable(format!("local write failed: {e}")))?;
            total += chunk.len() as u64;
            debug!(file = name, total, "received chunk");
        }
        writer
            .flush()
            .await
            .map_err(|e| TransferError::StoreUnavailable(format!("local write failed: {e}")))?;
        Ok(total)
    }

    /// Upload an explicit chunk sequence; returns the size the server
    /// reports. Without a `name` the server only counts the bytes.
    pub async fn upload_chunks<I>(&self, name: Option<&FileName>, chunks: I) -> Result<u64>
    where
        I: Stream<Item = Chunk> + Send + 'static,
    {
        let mut request = self.request(chunks.map(proto::UploadRequest::from));
        if let Some(name) = name {
            auth::set_destination(request.metadata_mut(), name);
        }
        let response = self
            .inner
            .clone()
            .upload(request)
            .await
            .map_err(from_status)?;
        Ok(response.into_inner().size)
    }

    /// Upload everything `source` yields, stored as `name` if given.
    pub async fn upload<R>(&self, name: Option<&FileName>, source: R) -> Result<u64>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (chunks, reader) = self.read_chunks(source);
        let uploaded = self.upload_chunks(name, chunks).await;
        settle_reader(reader).await?;
        uploaded
    }

    /// Upload an explicit chunk sequence, receiving one notification per
    /// chunk. Without a `name` the server only counts the bytes.
    pub async fn upload_chunks_with_progress<I>(
        &self,
        name: Option<&FileName>,
        chunks: I,
    ) -> Result<ProgressStream>
    where
        I: Stream<Item = Chunk> + Send + 'static,
    {
        let mut request = self.request(chunks.map(proto::UploadAndNotifyProgressRequest::from));
        if let Some(name) = name {
            auth::set_destination(request.metadata_mut(), name);
        }
        let response = self
            .inner
            .clone()
            .upload_and_notify_progress(request)
            .await
            .map_err(from_status)?;
        let stream = response
            .into_inner()
            .map(|result| result.map(Progress::from).map_err(from_status));
        Ok(Box::pin(stream))
    }

    /// Upload everything `source` yields, receiving progress notifications.
    ///
    /// A local read failure surfaces as the stream's last item.
    pub async fn upload_with_progress<R>(
        &self,
        name: Option<&FileName>,
        source: R,
    ) -> Result<ProgressStream>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (chunks, reader) = self.read_chunks(source);
        let notifications = self.upload_chunks_with_progress(name, chunks).await?;
        let tail = futures_util::stream::once(settle_reader(reader))
            .filter_map(|settled| async move { settled.err().map(Err) });
        Ok(Box::pin(notifications.chain(tail)))
    }

    /// Frame `source` on a separate task, honoring the pacing delay.
    fn read_chunks<R>(&self, source: R) -> (ReceiverStream<Chunk>, JoinHandle<Result<u64>>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(4);
        let size = self.chunk_size;
        let pacing = self.pacing;

        let reader = tokio::spawn(async move {
            let mut reader = ChunkReader::new(source, size);
            let mut sent = 0u64;
            loop {
                let chunk = match reader.next_chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => return Ok(sent),
                    Err(e) => {
                        return Err(TransferError::StoreUnavailable(format!(
                            "local read failed: {e}"
                        )));
                    }
                };
                let len = chunk.len() as u64;
                if tx.send(chunk).await.is_err() {
                    // The call ended; whatever it reported is the outcome.
                    return Ok(sent);
                }
                sent += len;
                if let Some(delay) = pacing {
                    tokio::time::sleep(delay).await;
                }
            }
        });

        (ReceiverStream::new(rx), reader)
    }
}

async fn settle_reader(reader: JoinHandle<Result<u64>>) -> Result<u64> {
    reader
        .await
        .map_err(|e| TransferError::Transport(format!("local reader aborted: {e}")))?
}
