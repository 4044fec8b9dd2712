use sha2::Digest;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tokio::time::sleep;

use crate::client::ImportApi;
use crate::config::UploadOptions;
use crate::errors::{AppError, AppResult};
use crate::models::{FlowFileState, UploadUnit};

const READ_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// Compared against the flowfile's content hash after a transfer.
    Sha256,
    /// The server's datafile digest, used when reconciling imports.
    Sha1,
}

/// Hex digest of the file at `path`, read in 1 MiB blocks.
pub fn hash_file(path: &Path, algorithm: HashAlgorithm) -> AppResult<String> {
    match algorithm {
        HashAlgorithm::Sha256 => digest_file::<sha2::Sha256>(path),
        HashAlgorithm::Sha1 => digest_file::<sha1::Sha1>(path),
    }
}

fn digest_file<D: Digest>(path: &Path) -> AppResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// [`hash_file`] on the blocking pool.
pub async fn hash_file_async(path: PathBuf, algorithm: HashAlgorithm) -> AppResult<String> {
    tokio::task::spawn_blocking(move || hash_file(&path, algorithm))
        .await
        .map_err(|e| AppError::Internal(format!("hashing task failed: {}", e)))?
}

/// Wait until the server has joined the chunks of `transfer_id` and check
/// that its content hash equals the SHA-256 of the local file.
///
/// The flowfile is polled at most `hash_max_attempts` times. A hash that
/// still differs on the last poll is reported as a mismatch.
pub async fn verify_upload<A: ImportApi>(
    api: &A,
    unit: &UploadUnit,
    transfer_id: &str,
    options: &UploadOptions,
) -> AppResult<()> {
    let local_hash = hash_file_async(unit.source_path.clone(), HashAlgorithm::Sha256).await?;
    let mut server_hash: Option<String> = None;

    for attempt in 1..=options.hash_max_attempts {
        let flow_file = api.flow_file(transfer_id).await?;

        match flow_file.status() {
            FlowFileState::Assembled => {
                if flow_file.content_hash.eq_ignore_ascii_case(&local_hash) {
                    log::debug!("hash verified for {}: {}", unit.display_path(), local_hash);
                    return Ok(());
                }
                log::debug!(
                    "hash of {} does not match yet (attempt {}/{})",
                    unit.display_path(),
                    attempt,
                    options.hash_max_attempts
                );
                server_hash = Some(flow_file.content_hash);
            }
            FlowFileState::Failed => {
                return Err(AppError::chunk_assembly(&unit.display_path()));
            }
            FlowFileState::Assembling => {}
        }

        if attempt < options.hash_max_attempts {
            sleep(options.hash_poll_interval).await;
        }
    }

    match server_hash {
        Some(server) => Err(AppError::HashMismatch {
            path: unit.display_path(),
            local: local_hash,
            server,
        }),
        None => Err(AppError::VerificationTimeout {
            path: unit.display_path(),
            attempts: options.hash_max_attempts,
        }),
    }
}
