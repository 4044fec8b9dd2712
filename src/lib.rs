//! Bulk uploader for the Agora data-management server.
//!
//! Files and directory trees are sent to an import session in chunks; small
//! files are zipped together first. See [`uploader::upload`] for a full run.

pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod uploader;

pub use client::{AgoraClient, ChunkRequest, CompleteParams, Credentials, ImportApi, TransportConfig};
pub use config::{Config, UploadOptions};
pub use errors::{AppError, AppResult};
pub use models::UploadUnit;
pub use uploader::{upload, UploadOutcome, UploadRequest, WaitOptions};
