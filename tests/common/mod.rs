use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use agora_uploader::models::{FlowFile, ImportPackage, ImportProgress, ImportResult};
use agora_uploader::uploader::retry::RetryConfig;
use agora_uploader::{AppError, AppResult, ChunkRequest, CompleteParams, ImportApi, UploadOptions};

pub const IMPORT_ID: i64 = 17;

/// In-memory stand-in for the Agora server.
#[derive(Default)]
pub struct FakeServer {
    state: Mutex<ServerState>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

#[derive(Default)]
pub struct ServerState {
    pub imports_created: usize,
    /// Every upload attempt as (target path, chunk number), failed ones included.
    pub attempts: Vec<(String, u64)>,
    /// Accepted chunks in arrival order.
    pub chunks: Vec<ChunkRequest>,
    pub flow_polls: usize,
    pub progress_calls: usize,
    pub completed: Option<CompleteParams>,

    pub fail_create: bool,
    pub fail_complete: bool,
    /// Target path -> number of upload attempts still to reject.
    pub chunk_failures: HashMap<String, u32>,
    pub assembly_failures: HashSet<String>,
    /// Targets whose flowfile never leaves the assembling state.
    pub withheld_assembly: HashSet<String>,
    pub corrupt_hashes: HashSet<String>,
    /// (state, progress) answers; the last one repeats.
    pub progress_script: VecDeque<(i32, i32)>,
    /// Time every accepted chunk spends in flight.
    pub chunk_delay: Duration,
    pub results: Vec<ImportResult>,
}

impl FakeServer {
    pub fn new() -> Self {
        let server = Self::default();
        server.script_progress(&[IMPORT_UPLOAD_FINISHED]);
        server
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    /// Script states only; the import finished state reports 100%.
    pub fn script_progress(&self, states: &[i32]) {
        let answers: Vec<(i32, i32)> = states
            .iter()
            .map(|&state| (state, if state == 5 { 100 } else { 50 }))
            .collect();
        self.script_progress_with(&answers);
    }

    pub fn script_progress_with(&self, answers: &[(i32, i32)]) {
        self.with_state(|s| s.progress_script = answers.iter().copied().collect());
    }

    /// Highest number of chunk uploads seen in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn chunks_for(&self, target: &str) -> Vec<ChunkRequest> {
        self.with_state(|s| {
            s.chunks
                .iter()
                .filter(|c| c.target_path == target)
                .cloned()
                .collect()
        })
    }

    pub fn transfer_ids(&self) -> HashSet<String> {
        self.with_state(|s| s.chunks.iter().map(|c| c.identifier.clone()).collect())
    }

    /// Chunks of `transfer_id` joined in index order.
    pub fn assembled(&self, transfer_id: &str) -> Option<Vec<u8>> {
        self.with_state(|s| assemble(&s.chunks, transfer_id))
    }
}

const IMPORT_UPLOAD_FINISHED: i32 = 4;

fn assemble(chunks: &[ChunkRequest], transfer_id: &str) -> Option<Vec<u8>> {
    let mut parts: Vec<&ChunkRequest> = chunks
        .iter()
        .filter(|c| c.identifier == transfer_id)
        .collect();
    let total = parts.first()?.total_chunks;
    parts.sort_by_key(|c| c.chunk_number);
    let indices: Vec<u64> = parts.iter().map(|c| c.chunk_number).collect();
    if indices != (0..total).collect::<Vec<_>>() {
        return None;
    }
    Some(parts.iter().flat_map(|c| c.data.iter().copied()).collect())
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

impl ImportApi for FakeServer {
    async fn create_import(&self) -> AppResult<ImportPackage> {
        self.with_state(|s| {
            if s.fail_create {
                return Err(AppError::import_session(
                    "could not get the import session. http status = 500",
                ));
            }
            s.imports_created += 1;
            Ok(ImportPackage {
                id: IMPORT_ID,
                ..ImportPackage::default()
            })
        })
    }

    async fn upload_chunk(&self, import_id: i64, chunk: &ChunkRequest) -> AppResult<()> {
        assert_eq!(import_id, IMPORT_ID);
        let delay = self.with_state(|s| {
            s.attempts
                .push((chunk.target_path.clone(), chunk.chunk_number));
            if let Some(remaining) = s.chunk_failures.get_mut(&chunk.target_path) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(AppError::BadStatus {
                        url: "http://fake/api/v1/import/17/upload/".to_string(),
                        status: 502,
                    });
                }
            }
            Ok(s.chunk_delay)
        })?;

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.with_state(|s| s.chunks.push(chunk.clone()));
        Ok(())
    }

    async fn flow_file(&self, transfer_id: &str) -> AppResult<FlowFile> {
        self.with_state(|s| {
            s.flow_polls += 1;
            let target = s
                .chunks
                .iter()
                .find(|c| c.identifier == transfer_id)
                .map(|c| c.target_path.clone());

            let Some(target) = target else {
                return Ok(FlowFile::default());
            };
            if s.withheld_assembly.contains(&target) {
                return Ok(FlowFile::default());
            }
            if s.assembly_failures.contains(&target) {
                return Ok(FlowFile {
                    state: 3,
                    content_hash: String::new(),
                });
            }
            let Some(data) = assemble(&s.chunks, transfer_id) else {
                return Ok(FlowFile::default());
            };
            let content_hash = if s.corrupt_hashes.contains(&target) {
                sha256_hex(b"corrupted")
            } else {
                sha256_hex(&data)
            };
            Ok(FlowFile {
                state: 2,
                content_hash,
            })
        })
    }

    async fn complete_import(&self, import_id: i64, params: &CompleteParams) -> AppResult<()> {
        assert_eq!(import_id, IMPORT_ID);
        self.with_state(|s| {
            if s.fail_complete {
                return Err(AppError::import_session(
                    "the \"complete\" request was invalid. http status = 400",
                ));
            }
            s.completed = Some(params.clone());
            Ok(())
        })
    }

    async fn import_progress(&self, _import_id: i64) -> AppResult<ImportProgress> {
        self.with_state(|s| {
            s.progress_calls += 1;
            let (state, progress) = if s.progress_script.len() > 1 {
                s.progress_script.pop_front().unwrap_or_default()
            } else {
                s.progress_script.front().copied().unwrap_or_default()
            };
            Ok(ImportProgress {
                state,
                progress,
                ..ImportProgress::default()
            })
        })
    }

    async fn import_result(&self, _import_id: i64) -> AppResult<Vec<ImportResult>> {
        self.with_state(|s| Ok(s.results.clone()))
    }
}

/// Small chunks and no waiting between polls or retries.
pub fn test_options() -> UploadOptions {
    UploadOptions {
        chunk_size: 100,
        max_zip_size: 1024 * 1024,
        parallel_uploads: 3,
        retry: RetryConfig::immediate(3),
        hash_poll_interval: Duration::from_millis(1),
        hash_max_attempts: 5,
        progress_poll_interval: Duration::from_millis(1),
        dry_run: false,
    }
}

pub fn write_file(path: &Path, data: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, data).unwrap();
}

/// Deterministic, incompressible content.
pub fn content(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i >> 3) as u8)
        .collect()
}
