use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Cannot connect to the Agora server at {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("Authentication failed: {reason}")]
    Authentication { reason: String },

    #[error("Request to {url} failed with http status {status}")]
    BadStatus { url: String, status: u16 },

    #[error("Chunk {chunk}/{total} of {path} failed after {attempts} attempts: {reason}")]
    ChunkUpload {
        path: String,
        chunk: u64,
        total: u64,
        attempts: u32,
        reason: String,
    },

    #[error("Failed to upload {path}: there was an error joining the chunks")]
    ChunkAssembly { path: String },

    #[error("Hashes do not match for file {path} (local {local}, server {server})")]
    HashMismatch {
        path: String,
        local: String,
        server: String,
    },

    #[error("Server did not finish assembling {path} after {attempts} status checks")]
    VerificationTimeout { path: String, attempts: u32 },

    #[error("Import session error: {reason}")]
    ImportSession { reason: String },

    #[error("The import failed")]
    ImportFailed,

    #[error("Upload progress timeout after {seconds}s")]
    ProgressTimeout { seconds: u64 },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn bad_status(url: &str, status: reqwest::StatusCode) -> Self {
        Self::BadStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }
    }

    pub fn connection(url: &str, reason: impl ToString) -> Self {
        Self::Connection {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn authentication(reason: &str) -> Self {
        Self::Authentication {
            reason: reason.to_string(),
        }
    }

    pub fn import_session(reason: impl Into<String>) -> Self {
        Self::ImportSession {
            reason: reason.into(),
        }
    }

    pub fn chunk_assembly(path: &str) -> Self {
        Self::ChunkAssembly {
            path: path.to_string(),
        }
    }

    /// Errors a single chunk POST may be retried on.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Network(_) | AppError::BadStatus { .. } | AppError::Io(_)
        )
    }
}
