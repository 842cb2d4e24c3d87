//! Ferry error types

use std::io;

/// Ferry error types
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransferError {
    // Storage errors
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid file name: {0}")]
    InvalidName(String),

    // Call lifecycle errors
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("call canceled")]
    Canceled,

    // Transport/setup errors
    #[error("transport error: {0}")]
    Transport(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl TransferError {
    /// Whether a caller may reasonably retry the whole call.
    ///
    /// `NotFound` and `DeadlineExceeded` are deliberately excluded: the
    /// first will not change on retry, the second is the caller's own budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Transport(_))
    }

    /// Short snake_case label, used as the `status` metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::InvalidName(_) => "invalid_name",
            Self::Unauthenticated(_) => "unauthenticated",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Canceled => "canceled",
            Self::Transport(_) => "transport",
            Self::Configuration(_) => "configuration",
        }
    }

    /// Map an I/O error raised while touching `name`.
    pub(crate) fn from_io(name: &str, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(name.to_string()),
            _ => Self::StoreUnavailable(format!("{name}: {err}")),
        }
    }
}

impl From<TransferError> for tonic::Status {
    fn from(err: TransferError) -> Self {
        let msg = err.to_string();
        match err {
            TransferError::NotFound(_) => tonic::Status::not_found(msg),
            TransferError::StoreUnavailable(_) => tonic::Status::unavailable(msg),
            TransferError::InvalidName(_) => tonic::Status::invalid_argument(msg),
            TransferError::Unauthenticated(_) => tonic::Status::unauthenticated(msg),
            TransferError::DeadlineExceeded => tonic::Status::deadline_exceeded(msg),
            TransferError::Canceled => tonic::Status::cancelled(msg),
            TransferError::Transport(_) | TransferError::Configuration(_) => {
                tonic::Status::internal(msg)
            }
        }
    }
}

/// Convert [`tonic::Status`] to [`TransferError`].
///
/// Used on both sides of the wire: the client maps call results, the
/// server maps errors surfaced by an inbound request stream.
pub fn from_status(status: tonic::Status) -> TransferError {
    let message = status.message();
    match status.code() {
        tonic::Code::NotFound => TransferError::NotFound(detail(message, "file not found: ")),
        tonic::Code::Unavailable => {
            TransferError::StoreUnavailable(detail(message, "store unavailable: "))
        }
        tonic::Code::InvalidArgument => {
            TransferError::InvalidName(detail(message, "invalid file name: "))
        }
        tonic::Code::Unauthenticated => {
            TransferError::Unauthenticated(detail(message, "unauthenticated: "))
        }
        tonic::Code::DeadlineExceeded => TransferError::DeadlineExceeded,
        tonic::Code::Cancelled => TransferError::Canceled,
        _ => TransferError::Transport(detail(message, "transport error: ")),
    }
}

/// The variant payload of a status message rendered by a ferry server.
fn detail(message: &str, prefix: &str) -> String {
    message.strip_prefix(prefix).unwrap_or(message).to_string()
}

impl From<tonic::Status> for TransferError {
    fn from(status: tonic::Status) -> Self {
        from_status(status)
    }
}

impl From<tonic::transport::Error> for TransferError {
    fn from(err: tonic::transport::Error) -> Self {
        TransferError::Transport(err.to_string())
    }
}

/// Result type alias for Ferry operations
pub type Result<T> = std::result::Result<T, TransferError>;
