//! Telemetry metric name constants.
//!
//! Consumers install their own `metrics` recorder (e.g. prometheus,
//! statsd); without a recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `ferry_`. Counters end in `_total`.
//!
//! # Common labels
//!
//! - `operation`: "list", "download", "upload" or "upload_progress"
//! - `status`: "ok" or the error kind (e.g. "not_found")
//! - `direction`: "sent" or "received"

/// Total calls that reached the engine.
///
/// Labels: `operation`, `status`.
pub const CALLS_TOTAL: &str = "ferry_calls_total";

/// Total file bytes moved.
///
/// Labels: `operation`, `direction`.
pub const BYTES_TOTAL: &str = "ferry_bytes_total";

/// Total chunks moved.
///
/// Labels: `operation`, `direction`.
pub const CHUNKS_TOTAL: &str = "ferry_chunks_total";

/// Total calls rejected by the auth middleware.
pub const AUTH_REJECTIONS_TOTAL: &str = "ferry_auth_rejections_total";
