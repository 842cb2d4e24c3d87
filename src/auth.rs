//! Per-call middleware: bearer-token authentication and call logging.
//!
//! Server-side middleware implements [`CallMiddleware`] and is composed
//! into a [`MiddlewareChain`], which the transport installs as the
//! service's `tonic` interceptor. The chain runs before any engine logic,
//! so a rejected call never touches the store.
//!
//! [`BearerCredential`] is the client-side counterpart: it attaches the
//! `authorization` entry to every outgoing call.

use std::fmt;
use std::sync::Arc;

use tonic::metadata::{AsciiMetadataValue, BinaryMetadataValue, MetadataMap};
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::{info, warn};

use crate::store::FileName;
use crate::{Result, TransferError, telemetry};

/// Metadata key carrying the bearer credential.
pub const AUTHORIZATION: &str = "authorization";

/// Metadata key naming an upload's destination file.
///
/// Binary (`-bin`) so that any UTF-8 name survives the trip.
pub const FILENAME: &str = "x-filename-bin";

/// Metadata key tonic uses for the caller's deadline.
pub const GRPC_TIMEOUT: &str = "grpc-timeout";

const BEARER: &str = "bearer";

/// Read the upload destination from call metadata, if one was sent.
pub fn destination(metadata: &MetadataMap) -> Result<Option<FileName>> {
    let Some(value) = metadata.get_bin(FILENAME) else {
        return Ok(None);
    };
    let bytes = value
        .to_bytes()
        .map_err(|_| TransferError::InvalidName("undecodable file name".to_string()))?;
    let name = String::from_utf8(bytes.to_vec())
        .map_err(|_| TransferError::InvalidName("file name is not UTF-8".to_string()))?;
    FileName::new(name).map(Some)
}

/// Name the upload destination in outgoing call metadata.
pub fn set_destination(metadata: &mut MetadataMap, name: &FileName) {
    metadata.insert_bin(FILENAME, BinaryMetadataValue::from_bytes(name.as_str().as_bytes()));
}

/// A bearer token.
///
/// `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Extract the token from an `authorization: Bearer <token>` entry.
    pub fn from_metadata(metadata: &MetadataMap) -> Result<Self> {
        let value = metadata.get(AUTHORIZATION).ok_or_else(|| {
            TransferError::Unauthenticated("request unauthenticated with bearer".to_string())
        })?;
        let value = value.to_str().map_err(|_| {
            TransferError::Unauthenticated("authorization header is not ASCII".to_string())
        })?;
        Self::parse_header(value)
    }

    /// Parse `Bearer <token>`; the scheme is case-insensitive.
    pub fn parse_header(value: &str) -> Result<Self> {
        let malformed = || TransferError::Unauthenticated("bad authorization string".to_string());
        let (scheme, token) = value.split_once(' ').ok_or_else(malformed)?;
        if !scheme.eq_ignore_ascii_case(BEARER) || token.is_empty() {
            return Err(malformed());
        }
        Ok(Self(token.to_string()))
    }

    /// The `authorization` header value for this token.
    pub fn header_value(&self) -> Result<AsciiMetadataValue> {
        format!("Bearer {}", self.0).parse().map_err(|_| {
            TransferError::Configuration("token is not a valid header value".to_string())
        })
    }

    /// Compare tokens without leaking the mismatch position through timing.
    pub fn verify(&self, presented: &Credential) -> bool {
        constant_time_eq(self.0.as_bytes(), presented.0.as_bytes())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(..)")
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// A step in the per-call middleware chain.
///
/// Returning `Err` short-circuits the call with that status; the remaining
/// middleware and the handler never run.
pub trait CallMiddleware: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_call(&self, request: Request<()>) -> std::result::Result<Request<()>, Status>;
}

/// Rejects calls whose bearer token does not match the expected one.
pub struct BearerAuth {
    expected: Credential,
}

impl BearerAuth {
    pub fn new(expected: Credential) -> Self {
        Self { expected }
    }
}

impl CallMiddleware for BearerAuth {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn on_call(&self, request: Request<()>) -> std::result::Result<Request<()>, Status> {
        let presented = Credential::from_metadata(request.metadata()).inspect_err(|_| {
            metrics::counter!(telemetry::AUTH_REJECTIONS_TOTAL).increment(1);
        })?;
        if !self.expected.verify(&presented) {
            metrics::counter!(telemetry::AUTH_REJECTIONS_TOTAL).increment(1);
            return Err(TransferError::Unauthenticated("token is invalid".to_string()).into());
        }
        Ok(request)
    }
}

/// Logs a summary of every incoming call. Never rejects.
pub struct CallLogger;

impl CallMiddleware for CallLogger {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn on_call(&self, request: Request<()>) -> std::result::Result<Request<()>, Status> {
        let metadata = request.metadata();
        let file = destination(metadata).ok().flatten();
        info!(
            remote = ?request.remote_addr(),
            credential = metadata.contains_key(AUTHORIZATION),
            timeout = metadata
                .get(GRPC_TIMEOUT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-"),
            file = file.as_ref().map_or("-", FileName::as_str),
            "incoming call"
        );
        Ok(request)
    }
}

/// Ordered middleware applied uniformly to every call.
///
/// Implements [`Interceptor`], so it can be handed directly to a generated
/// `*Server::with_interceptor`.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn CallMiddleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logging first, then bearer authentication.
    pub fn standard(expected: Credential) -> Self {
        Self::new().with(CallLogger).with(BearerAuth::new(expected))
    }

    /// Append a middleware; it runs after those already added.
    pub fn with(mut self, middleware: impl CallMiddleware + 'static) -> Self {
        self.layers.push(Arc::new(middleware));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|layer| layer.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl Interceptor for MiddlewareChain {
    fn call(&mut self, mut request: Request<()>) -> std::result::Result<Request<()>, Status> {
        for layer in &self.layers {
            request = layer.on_call(request).inspect_err(|status| {
                warn!(
                    middleware = layer.name(),
                    code = ?status.code(),
                    message = status.message(),
                    "call rejected"
                );
            })?;
        }
        Ok(request)
    }
}

/// Client interceptor attaching `authorization: Bearer <token>` to each call.
#[derive(Clone)]
pub struct BearerCredential {
    value: Option<AsciiMetadataValue>,
}

impl BearerCredential {
    pub fn new(credential: &Credential) -> Result<Self> {
        Ok(Self {
            value: Some(credential.header_value()?),
        })
    }

    /// Sends calls without any credential.
    pub fn anonymous() -> Self {
        Self { value: None }
    }
}

impl Interceptor for BearerCredential {
    fn call(&mut self, mut request: Request<()>) -> std::result::Result<Request<()>, Status> {
        if let Some(value) = &self.value {
            request.metadata_mut().insert(AUTHORIZATION, value.clone());
        }
        Ok(request)
    }
}
