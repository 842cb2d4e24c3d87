//! gRPC service implementation.
//!
//! [`FileTransferService`] implements the generated `FileService` trait,
//! whose four methods are all mandatory, by delegating to a
//! [`TransferEngine`]. It translates proto messages to chunks, call
//! metadata to a [`CallContext`], and engine errors to `tonic::Status`.
//! Authentication happens earlier, in the middleware chain.

use std::pin::Pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status, Streaming};

use crate::auth::{self, GRPC_TIMEOUT};
use crate::chunk::Chunk;
use crate::engine::{CallContext, TransferEngine};
use crate::error::from_status;
use crate::store::{FileName, FileStore};

use super::proto;
use super::proto::file_service_server::FileService;

/// gRPC service that wraps a [`TransferEngine`].
pub struct FileTransferService<S> {
    engine: TransferEngine<S>,
    call_timeout: Option<Duration>,
}

impl<S: FileStore> FileTransferService<S> {
    /// Create a new service wrapping the given engine.
    pub fn new(engine: TransferEngine<S>) -> Self {
        Self {
            engine,
            call_timeout: None,
        }
    }

    /// Cap every call at `timeout`, whatever deadline the caller sent.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// The earlier of the caller's `grpc-timeout` and the server cap.
    fn call_context(&self, metadata: &MetadataMap) -> CallContext {
        let requested = metadata
            .get(GRPC_TIMEOUT)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout);
        let timeout = match (requested, self.call_timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        timeout.map_or_else(CallContext::new, CallContext::with_timeout)
    }
}

/// Parse a `grpc-timeout` header value: up to 8 digits and a unit.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let duration = match unit {
        "H" => Duration::from_secs(amount.checked_mul(3600)?),
        "M" => Duration::from_secs(amount.checked_mul(60)?),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}

/// Inbound request stream as engine chunks.
fn chunks<T>(
    inbound: Streaming<T>,
) -> impl Stream<Item = crate::Result<Chunk>> + Send + Unpin + 'static
where
    T: Send + 'static,
    Chunk: From<T>,
{
    inbound.map(|message| message.map(Chunk::from).map_err(from_status))
}

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

#[tonic::async_trait]
impl<S: FileStore> FileService for FileTransferService<S> {
    async fn list_files(
        &self,
        _request: Request<proto::ListFilesRequest>,
    ) -> Result<Response<proto::ListFilesResponse>, Status> {
        let names = self.engine.list().await?;
        Ok(Response::new(proto::ListFilesResponse {
            filenames: names.into_iter().map(|n| n.to_string()).collect(),
        }))
    }

    type DownloadStream = ResponseStream<proto::DownloadResponse>;

    async fn download(
        &self,
        request: Request<proto::DownloadRequest>,
    ) -> Result<Response<Self::DownloadStream>, Status> {
        let ctx = self.call_context(request.metadata());
        let name = FileName::new(request.into_inner().filename)?;
        let chunks = self.engine.download(&name, ctx).await?;
        let stream =
            chunks.map(|item| item.map(proto::DownloadResponse::from).map_err(Status::from));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn upload(
        &self,
        request: Request<Streaming<proto::UploadRequest>>,
    ) -> Result<Response<proto::UploadResponse>, Status> {
        let ctx = self.call_context(request.metadata());
        let name = auth::destination(request.metadata())?;
        let size = self
            .engine
            .upload(name.as_ref(), chunks(request.into_inner()), ctx)
            .await?;
        Ok(Response::new(proto::UploadResponse { size }))
    }

    type UploadAndNotifyProgressStream = ResponseStream<proto::UploadAndNotifyProgressResponse>;

    async fn upload_and_notify_progress(
        &self,
        request: Request<Streaming<proto::UploadAndNotifyProgressRequest>>,
    ) -> Result<Response<Self::UploadAndNotifyProgressStream>, Status> {
        let ctx = self.call_context(request.metadata());
        let name = auth::destination(request.metadata())?;
        let upload = self
            .engine
            .upload_with_progress(name.as_ref(), chunks(request.into_inner()), ctx)
            .await?;
        // The coordinator task settles on its own; the caller observes the
        // outcome through the notification stream.
        let stream = upload.notifications.map(|item| {
            item.map(proto::UploadAndNotifyProgressResponse::from)
                .map_err(Status::from)
        });
        Ok(Response::new(Box::pin(stream)))
    }
}
