//! Client library for connecting to ferryd.
//!
//! Provides [`FileClient`], which drives the four file-transfer calls over
//! a TLS channel and attaches the bearer credential to every call.

mod file_client;

pub use file_client::{ClientOptions, DownloadStream, FileClient, ProgressStream};
