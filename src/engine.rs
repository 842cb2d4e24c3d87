//! Transfer engine: the four file-transfer operations.
//!
//! Each operation is a small state machine over abstract streams, with no
//! knowledge of gRPC. Inbound data arrives as a [`Stream`] of chunks;
//! outbound data leaves through a bounded `mpsc` channel wrapped in a
//! [`ReceiverStream`], so a slow consumer applies backpressure to the
//! engine and a vanished consumer stops it.
//!
//! Every call owns a `TransferSession` holding its file handle. The
//! session is consumed by `finish`, which drops the handle before the
//! outcome is reported, on success, error, cancellation and deadline alike.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::chunk::{Chunk, ChunkReader, ChunkSize};
use crate::store::{FileName, FileStore};
use crate::{Result, TransferError, telemetry};

/// Default number of outbound messages buffered per call.
pub const DEFAULT_STREAM_BUFFER: usize = 16;

/// Outbound chunks of a download.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk>> + Send>>;

/// Outbound notifications of an upload with progress.
pub type ProgressStream = Pin<Box<dyn Stream<Item = Result<Progress>> + Send>>;

/// Cumulative byte count reported after each received chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub received: u64,
}

impl Progress {
    /// Human-readable form carried in the notification's `msg` field.
    pub fn message(&self) -> String {
        format!("received {} bytes", self.received)
    }
}

/// Tunables shared by every call an engine serves.
///
/// ```rust
/// # use ferry::{ChunkSize, TransferPolicy};
/// # use std::time::Duration;
/// let policy = TransferPolicy::new()
///     .chunk_size(ChunkSize::REFERENCE)
///     .pacing(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct TransferPolicy {
    /// Download chunk size. Default: 64 KiB.
    pub chunk_size: ChunkSize,
    /// Delay between download chunks. Default: none.
    pub pacing: Option<Duration>,
    /// Outbound messages buffered per call. Default: 16.
    pub stream_buffer: usize,
    /// Progress notifications the receive flow may run ahead of the
    /// notify flow. Default: 1, i.e. near-lockstep alternation.
    pub progress_buffer: usize,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            chunk_size: ChunkSize::default(),
            pacing: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            progress_buffer: 1,
        }
    }
}

impl TransferPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_size(mut self, size: ChunkSize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn pacing(mut self, delay: Duration) -> Self {
        self.pacing = Some(delay);
        self
    }

    pub fn no_pacing(mut self) -> Self {
        self.pacing = None;
        self
    }

    /// Buffer sizes are clamped to at least one message.
    pub fn stream_buffer(mut self, messages: usize) -> Self {
        self.stream_buffer = messages.max(1);
        self
    }

    pub fn progress_buffer(mut self, notifications: usize) -> Self {
        self.progress_buffer = notifications.max(1);
        self
    }
}

/// Per-call cancellation scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
}

impl CallContext {
    /// A call with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves when the deadline passes; never resolves without one.
    async fn expired(self) {
        match self.deadline {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }
}

/// The engine's four operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    List,
    Download,
    Upload,
    UploadProgress,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::List => "list",
            Operation::Download => "download",
            Operation::Upload => "upload",
            Operation::UploadProgress => "upload_progress",
        }
    }

    fn direction(self) -> &'static str {
        match self {
            Operation::Download => "sent",
            _ => "received",
        }
    }
}

/// Handle on a running upload-with-progress call.
pub struct ProgressUpload {
    /// One notification per received chunk, in receipt order. Ends cleanly
    /// after end-of-input, or with a single error item if the call failed.
    pub notifications: ProgressStream,
    /// Resolves once both flows have stopped, with the total received.
    pub completion: JoinHandle<Result<u64>>,
}

/// Ephemeral state of one in-flight call.
struct TransferSession<H> {
    operation: Operation,
    name: Option<FileName>,
    handle: H,
    cursor: u64,
    chunks: u64,
    started: Instant,
}

impl<H> TransferSession<H> {
    fn new(operation: Operation, name: Option<FileName>, handle: H) -> Self {
        info!(
            operation = operation.as_str(),
            file = name.as_ref().map_or("-", FileName::as_str),
            "transfer started"
        );
        Self {
            operation,
            name,
            handle,
            cursor: 0,
            chunks: 0,
            started: Instant::now(),
        }
    }

    fn file(&self) -> &str {
        self.name.as_ref().map_or("-", FileName::as_str)
    }

    fn advance(&mut self, len: usize) {
        self.cursor += len as u64;
        self.chunks += 1;
        debug!(
            operation = self.operation.as_str(),
            file = self.file(),
            len,
            cursor = self.cursor,
            "chunk"
        );
    }

    /// End the session: release the handle, then record and log the outcome.
    fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        let Self {
            operation,
            name,
            handle,
            cursor,
            chunks,
            started,
        } = self;
        drop(handle);

        record_call(operation, &outcome);
        metrics::counter!(
            telemetry::BYTES_TOTAL,
            "operation" => operation.as_str(),
            "direction" => operation.direction()
        )
        .increment(cursor);
        metrics::counter!(
            telemetry::CHUNKS_TOTAL,
            "operation" => operation.as_str(),
            "direction" => operation.direction()
        )
        .increment(chunks);

        let file = name.as_ref().map_or("-", FileName::as_str);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => info!(
                operation = operation.as_str(),
                file,
                bytes = cursor,
                chunks,
                elapsed_ms,
                "transfer completed"
            ),
            Err(TransferError::Canceled) => info!(
                operation = operation.as_str(),
                file,
                bytes = cursor,
                "transfer canceled by caller"
            ),
            Err(e) => warn!(
                operation = operation.as_str(),
                file,
                bytes = cursor,
                error = %e,
                "transfer failed"
            ),
        }
        outcome
    }
}

fn record_call<T>(operation: Operation, outcome: &Result<T>) {
    let status = match outcome {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    };
    metrics::counter!(
        telemetry::CALLS_TOTAL,
        "operation" => operation.as_str(),
        "status" => status
    )
    .increment(1);
}

/// Implements List, Download, Upload and UploadWithProgress over a store.
pub struct TransferEngine<S> {
    store: Arc<S>,
    policy: TransferPolicy,
}

impl<S> Clone for TransferEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy.clone(),
        }
    }
}

impl<S: FileStore> TransferEngine<S> {
    /// Create an engine with the default policy.
    pub fn new(store: S) -> Self {
        Self::with_policy(store, TransferPolicy::default())
    }

    pub fn with_policy(store: S, policy: TransferPolicy) -> Self {
        Self {
            store: Arc::new(store),
            policy,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> &TransferPolicy {
        &self.policy
    }

    /// List every file in the store. No partial results.
    pub async fn list(&self) -> Result<Vec<FileName>> {
        let outcome = self.store.list().await;
        record_call(Operation::List, &outcome);
        match &outcome {
            Ok(names) => info!(files = names.len(), "listed store"),
            Err(e) => warn!(error = %e, "listing failed"),
        }
        outcome
    }

    /// Stream `name` to the caller in chunks.
    ///
    /// Opening the file happens before this returns, so a missing file is
    /// the call's error and no chunk is ever produced for it. Later
    /// failures arrive as the stream's final item.
    pub async fn download(&self, name: &FileName, ctx: CallContext) -> Result<ChunkStream> {
        let reader = match self.store.open_read(name).await {
            Ok(reader) => reader,
            Err(e) => {
                record_call(Operation::Download, &Err::<(), _>(e.clone()));
                warn!(file = %name, error = %e, "download rejected");
                return Err(e);
            }
        };

        let session = TransferSession::new(
            Operation::Download,
            Some(name.clone()),
            ChunkReader::new(reader, self.policy.chunk_size),
        );
        let (tx, rx) = mpsc::channel(self.policy.stream_buffer);
        tokio::spawn(run_download(session, tx, ctx, self.policy.pacing));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Receive the inbound chunks, returning the total size.
    ///
    /// With a `name` the bytes are written to the store; without one they
    /// are only counted.
    pub async fn upload<I>(
        &self,
        name: Option<&FileName>,
        inbound: I,
        ctx: CallContext,
    ) -> Result<u64>
    where
        I: Stream<Item = Result<Chunk>> + Send + Unpin,
    {
        let writer = self.open_destination(Operation::Upload, name).await?;
        let mut session = TransferSession::new(Operation::Upload, name.cloned(), writer);
        let mut inbound = inbound;
        let outcome = receive_chunks(&mut session, &mut inbound, ctx, None).await;
        session.finish(outcome)
    }

    /// Receive chunks while notifying the caller after each one.
    ///
    /// With a `name` the bytes are also written to the store; without
    /// one they are only counted. The receive and notify flows run as two
    /// tasks joined by a bounded channel; see [`ProgressUpload`].
    pub async fn upload_with_progress<I>(
        &self,
        name: Option<&FileName>,
        inbound: I,
        ctx: CallContext,
    ) -> Result<ProgressUpload>
    where
        I: Stream<Item = Result<Chunk>> + Send + Unpin + 'static,
    {
        let writer = self
            .open_destination(Operation::UploadProgress, name)
            .await?;

        let session = TransferSession::new(Operation::UploadProgress, name.cloned(), writer);
        let (out_tx, out_rx) = mpsc::channel(self.policy.stream_buffer);
        let (progress_tx, progress_rx) = mpsc::channel(self.policy.progress_buffer);

        let receiver = tokio::spawn(receive_flow(session, inbound, progress_tx, ctx));
        let notifier = tokio::spawn(notify_flow(progress_rx, out_tx.clone()));
        let completion = tokio::spawn(coordinate(receiver, notifier, out_tx));

        Ok(ProgressUpload {
            notifications: Box::pin(ReceiverStream::new(out_rx)),
            completion,
        })
    }

    /// Open the upload destination, if the call names one.
    async fn open_destination(
        &self,
        operation: Operation,
        name: Option<&FileName>,
    ) -> Result<Option<S::Writer>> {
        let Some(name) = name else {
            return Ok(None);
        };
        match self.store.open_write(name).await {
            Ok(writer) => Ok(Some(writer)),
            Err(e) => {
                record_call(operation, &Err::<(), _>(e.clone()));
                warn!(file = %name, error = %e, "upload rejected");
                Err(e)
            }
        }
    }
}

async fn run_download<R>(
    mut session: TransferSession<ChunkReader<R>>,
    tx: mpsc::Sender<Result<Chunk>>,
    ctx: CallContext,
    pacing: Option<Duration>,
) where
    R: AsyncRead + Unpin + Send,
{
    let expired = ctx.expired();
    tokio::pin!(expired);

    let outcome: Result<()> = loop {
        let next = tokio::select! {
            biased;
            _ = &mut expired => break Err(TransferError::DeadlineExceeded),
            _ = tx.closed() => break Err(TransferError::Canceled),
            next = session.handle.next_chunk() => next,
        };
        let chunk = match next {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break Ok(()),
            Err(e) => {
                break Err(TransferError::StoreUnavailable(format!(
                    "{}: {e}",
                    session.file()
                )));
            }
        };

        let len = chunk.len();
        tokio::select! {
            biased;
            _ = &mut expired => break Err(TransferError::DeadlineExceeded),
            sent = tx.send(Ok(chunk)) => {
                if sent.is_err() {
                    break Err(TransferError::Canceled);
                }
            }
        }
        session.advance(len);

        if let Some(delay) = pacing {
            tokio::select! {
                biased;
                _ = &mut expired => break Err(TransferError::DeadlineExceeded),
                _ = tx.closed() => break Err(TransferError::Canceled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    };

    // The handle is gone before the caller can observe the failure.
    if let Err(e) = session.finish(outcome) {
        if !matches!(e, TransferError::Canceled) {
            let _ = tx.send(Err(e)).await;
        }
    }
}

/// Shared receive loop of Upload and UploadWithProgress.
///
/// Writes each chunk (when the session has a writer), advances the cursor,
/// then, if `progress` is given, hands the running total to the notify
/// flow before taking the next chunk.
async fn receive_chunks<W, I>(
    session: &mut TransferSession<Option<W>>,
    inbound: &mut I,
    ctx: CallContext,
    progress: Option<&mpsc::Sender<Progress>>,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
    I: Stream<Item = Result<Chunk>> + Send + Unpin,
{
    let expired = ctx.expired();
    tokio::pin!(expired);

    loop {
        let next = tokio::select! {
            biased;
            _ = &mut expired => return Err(TransferError::DeadlineExceeded),
            _ = notifier_gone(progress) => return Err(TransferError::Canceled),
            next = inbound.next() => next,
        };
        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return Err(e),
            None => break,
        };

        if let Some(writer) = session.handle.as_mut() {
            let written = tokio::select! {
                biased;
                _ = &mut expired => return Err(TransferError::DeadlineExceeded),
                written = writer.write_all(chunk.as_bytes()) => written,
            };
            written.map_err(|e| TransferError::StoreUnavailable(format!("{}: {e}", session.file())))?;
        }
        session.advance(chunk.len());

        if let Some(progress) = progress {
            let update = Progress {
                received: session.cursor,
            };
            tokio::select! {
                biased;
                _ = &mut expired => return Err(TransferError::DeadlineExceeded),
                sent = progress.send(update) => {
                    if sent.is_err() {
                        return Err(TransferError::Canceled);
                    }
                }
            }
        }
    }

    if let Some(writer) = session.handle.as_mut() {
        writer
            .flush()
            .await
            .map_err(|e| TransferError::StoreUnavailable(format!("{}: {e}", session.file())))?;
    }
    Ok(session.cursor)
}

async fn notifier_gone(progress: Option<&mpsc::Sender<Progress>>) {
    match progress {
        Some(tx) => tx.closed().await,
        None => std::future::pending().await,
    }
}

async fn receive_flow<W, I>(
    mut session: TransferSession<Option<W>>,
    mut inbound: I,
    progress: mpsc::Sender<Progress>,
    ctx: CallContext,
) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
    I: Stream<Item = Result<Chunk>> + Send + Unpin,
{
    let outcome = receive_chunks(&mut session, &mut inbound, ctx, Some(&progress)).await;
    // Dropping the sender is the notify flow's end-of-input signal.
    drop(progress);
    session.finish(outcome)
}

async fn notify_flow(
    mut progress: mpsc::Receiver<Progress>,
    out: mpsc::Sender<Result<Progress>>,
) -> Result<u64> {
    let mut sent = 0;
    loop {
        let update = tokio::select! {
            biased;
            _ = out.closed() => return Err(TransferError::Canceled),
            update = progress.recv() => update,
        };
        let Some(update) = update else {
            return Ok(sent);
        };
        if out.send(Ok(update)).await.is_err() {
            return Err(TransferError::Canceled);
        }
        sent += 1;
    }
}

/// Join both flows of an upload with progress and settle the call.
async fn coordinate(
    receiver: JoinHandle<Result<u64>>,
    notifier: JoinHandle<Result<u64>>,
    out: mpsc::Sender<Result<Progress>>,
) -> Result<u64> {
    let received = receiver.await.unwrap_or_else(|e| {
        Err(TransferError::Transport(format!("receive flow aborted: {e}")))
    });

    match received {
        Ok(total) => {
            let notified = notifier.await.unwrap_or_else(|e| {
                Err(TransferError::Transport(format!("notify flow aborted: {e}")))
            });
            notified.map(|count| {
                debug!(total, notifications = count, "progress upload settled");
                total
            })
        }
        Err(e) => {
            notifier.abort();
            let _ = notifier.await;
            if !matches!(e, TransferError::Canceled) {
                let _ = out.send(Err(e.clone())).await;
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_message_reports_cumulative_bytes() {
        assert_eq!(Progress { received: 11 }.message(), "received 11 bytes");
    }

    #[test]
    fn policy_builder_clamps_buffers() {
        let policy = TransferPolicy::new().stream_buffer(0).progress_buffer(0);
        assert_eq!(policy.stream_buffer, 1);
        assert_eq!(policy.progress_buffer, 1);
        assert!(policy.pacing.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn context_without_deadline_never_expires() {
        let ctx = CallContext::new();
        let expired = tokio::time::timeout(Duration::from_secs(3600), ctx.expired()).await;
        assert!(expired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn context_with_timeout_expires() {
        let ctx = CallContext::with_timeout(Duration::from_millis(50));
        tokio::time::timeout(Duration::from_secs(1), ctx.expired())
            .await
            .expect("deadline should fire");
    }
}
