//! Conversions between ferry native types and protobuf types.
//!
//! Every data-carrying message is one [`Chunk`]; progress notifications
//! carry both the human-readable `msg` and the numeric total.

use crate::chunk::Chunk;
use crate::engine::Progress;

use super::proto;

// =============================================================================
// Chunks
// =============================================================================

impl From<Chunk> for proto::DownloadResponse {
    fn from(chunk: Chunk) -> Self {
        Self {
            data: chunk.into_bytes(),
        }
    }
}

impl From<proto::DownloadResponse> for Chunk {
    fn from(p: proto::DownloadResponse) -> Self {
        Chunk::from(p.data)
    }
}

impl From<Chunk> for proto::UploadRequest {
    fn from(chunk: Chunk) -> Self {
        Self {
            data: chunk.into_bytes(),
        }
    }
}

impl From<proto::UploadRequest> for Chunk {
    fn from(p: proto::UploadRequest) -> Self {
        Chunk::from(p.data)
    }
}

impl From<Chunk> for proto::UploadAndNotifyProgressRequest {
    fn from(chunk: Chunk) -> Self {
        Self {
            data: chunk.into_bytes(),
        }
    }
}

impl From<proto::UploadAndNotifyProgressRequest> for Chunk {
    fn from(p: proto::UploadAndNotifyProgressRequest) -> Self {
        Chunk::from(p.data)
    }
}

// =============================================================================
// Progress
// =============================================================================

impl From<Progress> for proto::UploadAndNotifyProgressResponse {
    fn from(progress: Progress) -> Self {
        Self {
            msg: progress.message(),
            received: progress.received,
        }
    }
}

impl From<proto::UploadAndNotifyProgressResponse> for Progress {
    fn from(p: proto::UploadAndNotifyProgressResponse) -> Self {
        Progress {
            received: p.received,
        }
    }
}
