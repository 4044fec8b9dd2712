use bytes::Bytes;
use std::cmp::min;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::sleep;
use uuid::Uuid;

use crate::client::{ChunkRequest, ImportApi};
use crate::config::UploadOptions;
use crate::errors::{AppError, AppResult};
use crate::models::UploadUnit;

use super::retry::RetryConfig;

/// Number of chunks of `chunk_size` needed to carry `total_size` bytes.
pub fn chunk_count(total_size: u64, chunk_size: u64) -> u64 {
    total_size.div_ceil(chunk_size)
}

/// Transfer state of one unit, alive while its chunks are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSession {
    pub transfer_id: String,
    pub chunk_size: u64,
    pub total_size: u64,
    pub total_chunks: u64,
}

impl TransferSession {
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        Self {
            transfer_id: Uuid::new_v4().to_string(),
            chunk_size,
            total_size,
            // An empty file still travels as one empty chunk.
            total_chunks: chunk_count(total_size, chunk_size).max(1),
        }
    }

    /// Expected length of chunk `chunk_number`.
    pub fn chunk_len(&self, chunk_number: u64) -> u64 {
        let offset = chunk_number * self.chunk_size;
        min(self.chunk_size, self.total_size.saturating_sub(offset))
    }
}

/// Send `unit` to the import's upload endpoint, chunk by chunk in index
/// order.
///
/// Each chunk gets up to `options.retry.max_attempts` attempts; when one
/// runs out, the remaining chunks are not attempted. In dry-run mode the
/// chunks are read and built but never sent.
pub async fn upload_unit<A: ImportApi>(
    api: &A,
    import_id: i64,
    unit: &UploadUnit,
    options: &UploadOptions,
) -> AppResult<TransferSession> {
    let total_size = tokio::fs::metadata(&unit.source_path).await?.len();
    let session = TransferSession::new(total_size, options.chunk_size);
    let file_name = unit.file_name();

    log::info!(
        "Upload file: {} > {} ({} chunks)",
        unit.display_path(),
        unit.target_path,
        session.total_chunks
    );

    let mut file = File::open(&unit.source_path).await?;

    for chunk_number in 0..session.total_chunks {
        log::debug!(
            "uploading chunk {}/{} of {}",
            chunk_number + 1,
            session.total_chunks,
            unit.target_path
        );

        let data = read_chunk(&mut file, session.chunk_len(chunk_number)).await?;
        let chunk = ChunkRequest {
            file_name: file_name.clone(),
            data: Bytes::from(data),
            chunk_number,
            chunk_size: session.chunk_size,
            total_size: session.total_size,
            identifier: session.transfer_id.clone(),
            target_path: unit.target_path.clone(),
            total_chunks: session.total_chunks,
        };

        if options.dry_run {
            continue;
        }

        send_chunk_with_retry(api, import_id, &chunk, &options.retry, unit).await?;
    }

    Ok(session)
}

/// Read exactly `len` bytes.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, len: u64) -> AppResult<Vec<u8>> {
    let mut data = Vec::with_capacity(len as usize);
    reader.take(len).read_to_end(&mut data).await?;

    if (data.len() as u64) < len {
        return Err(AppError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, file ended after {}", len, data.len()),
        )));
    }
    Ok(data)
}

async fn send_chunk_with_retry<A: ImportApi>(
    api: &A,
    import_id: i64,
    chunk: &ChunkRequest,
    retry: &RetryConfig,
    unit: &UploadUnit,
) -> AppResult<()> {
    let mut failed_attempts = 0;

    loop {
        let error = match api.upload_chunk(import_id, chunk).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        failed_attempts += 1;

        if !error.is_retryable() || !retry.should_retry(failed_attempts) {
            log::error!(
                "failed to upload chunk {}/{} of {} after {} attempts",
                chunk.chunk_number + 1,
                chunk.total_chunks,
                unit.display_path(),
                failed_attempts
            );
            return Err(AppError::ChunkUpload {
                path: unit.display_path(),
                chunk: chunk.chunk_number + 1,
                total: chunk.total_chunks,
                attempts: failed_attempts,
                reason: error.to_string(),
            });
        }

        let delay = retry.backoff_delay(failed_attempts);
        log::warn!(
            "retrying upload of chunk {}/{} ({}/{}) in {:?}: {}",
            chunk.chunk_number + 1,
            chunk.total_chunks,
            failed_attempts,
            retry.max_attempts,
            delay,
            error
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_count_is_ceiling() {
        assert_eq!(chunk_count(250, 100), 3);
        assert_eq!(chunk_count(200, 100), 2);
        assert_eq!(chunk_count(1, 100), 1);
        assert_eq!(chunk_count(0, 100), 0);
    }

    #[test]
    fn test_session_chunk_lengths_cover_the_file() {
        let session = TransferSession::new(250, 100);
        assert_eq!(session.total_chunks, 3);
        let lengths: Vec<u64> = (0..3).map(|i| session.chunk_len(i)).collect();
        assert_eq!(lengths, vec![100, 100, 50]);
        assert_eq!(lengths.iter().sum::<u64>(), 250);
    }

    #[test]
    fn test_empty_file_is_one_empty_chunk() {
        let session = TransferSession::new(0, 100);
        assert_eq!(session.total_chunks, 1);
        assert_eq!(session.chunk_len(0), 0);
    }

    #[test]
    fn test_transfer_ids_are_unique() {
        let a = TransferSession::new(10, 100);
        let b = TransferSession::new(10, 100);
        assert_ne!(a.transfer_id, b.transfer_id);
    }

    #[tokio::test]
    async fn test_read_chunk_reads_exact_lengths() {
        let data: Vec<u8> = (0..=255u8).cycle().take(250).collect();
        let mut reader = &data[..];

        let first = read_chunk(&mut reader, 100).await.unwrap();
        let second = read_chunk(&mut reader, 100).await.unwrap();
        let last = read_chunk(&mut reader, 50).await.unwrap();

        assert_eq!([first, second, last].concat(), data);
        assert!(read_chunk(&mut reader, 1).await.is_err());
    }
}
