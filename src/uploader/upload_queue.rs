use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::client::ImportApi;
use crate::config::UploadOptions;
use crate::errors::{AppError, AppResult};
use crate::models::UploadUnit;

use super::bundler::{bundle_files, BundleSummary};
use super::chunked::upload_unit;
use super::report::{UnitOutcome, UnitStatus, UploadReport};
use super::verify::verify_upload;

type WorkQueue = Arc<Mutex<Receiver<UploadUnit>>>;

/// Upload all units of an import through a fixed pool of workers.
///
/// Two producers fill the queue at the same time: one forwards the direct
/// units, the other bundles the zip candidates into archives inside
/// `temp_dir`. The queue is closed once both producers are done, and the
/// function returns once every worker has drained it.
pub async fn process_upload_queue<A: ImportApi>(
    api: Arc<A>,
    import_id: i64,
    direct: Vec<UploadUnit>,
    zip_candidates: Vec<UploadUnit>,
    temp_dir: PathBuf,
    options: Arc<UploadOptions>,
) -> UploadReport {
    let worker_count = options.parallel_uploads.max(1);
    let (tx, rx) = mpsc::channel::<UploadUnit>(worker_count);
    let queue: WorkQueue = Arc::new(Mutex::new(rx));

    let workers: Vec<JoinHandle<Vec<UnitOutcome>>> = (0..worker_count)
        .map(|worker_id| {
            tokio::spawn(upload_worker(
                worker_id,
                queue.clone(),
                api.clone(),
                import_id,
                options.clone(),
            ))
        })
        .collect();
    // Only the workers hold the receiver, so producers stop if all of them die.
    drop(queue);

    let direct_producer = tokio::spawn(enqueue_units(tx.clone(), direct));
    let zip_producer = {
        let tx = tx.clone();
        let max_zip_size = options.max_zip_size;
        tokio::task::spawn_blocking(move || {
            zip_and_enqueue(tx, &zip_candidates, &temp_dir, max_zip_size)
        })
    };

    let mut report = UploadReport::default();

    let (direct_result, zip_result) = tokio::join!(direct_producer, zip_producer);
    match direct_result {
        Ok(queued) => log::debug!("queued {} direct uploads", queued),
        Err(e) => log::error!("direct upload producer failed: {}", e),
    }
    match zip_result {
        Ok(Ok(summary)) => {
            log::debug!("queued {} zip archives", summary.archives);
            report.extend(
                summary
                    .skipped
                    .into_iter()
                    .map(|skipped| UnitOutcome {
                        unit: skipped.unit,
                        status: UnitStatus::Failed {
                            error: skipped.error.to_string(),
                        },
                    })
                    .collect(),
            );
        }
        Ok(Err(e)) => {
            log::error!("zipping the small files failed: {}", e);
            report.bundling_error = Some(e.to_string());
        }
        Err(e) => {
            log::error!("zip producer failed: {}", e);
            report.bundling_error = Some(e.to_string());
        }
    }

    // Both producers are done: close the queue.
    drop(tx);

    for worker in workers {
        match worker.await {
            Ok(outcomes) => report.extend(outcomes),
            Err(e) => log::error!("upload worker failed: {}", e),
        }
    }

    report
}

async fn enqueue_units(tx: Sender<UploadUnit>, units: Vec<UploadUnit>) -> usize {
    let total = units.len();
    let mut queued = 0;

    for unit in units {
        if tx.send(unit).await.is_err() {
            log::error!(
                "upload queue closed, {} of {} files were not queued",
                total - queued,
                total
            );
            break;
        }
        queued += 1;
    }

    queued
}

fn zip_and_enqueue(
    tx: Sender<UploadUnit>,
    candidates: &[UploadUnit],
    temp_dir: &std::path::Path,
    max_zip_size: u64,
) -> AppResult<BundleSummary> {
    bundle_files(candidates, temp_dir, max_zip_size, |bundle| {
        tx.blocking_send(bundle.into_unit())
            .map_err(|_| AppError::Internal("upload queue closed".to_string()))
    })
}

async fn upload_worker<A: ImportApi>(
    worker_id: usize,
    queue: WorkQueue,
    api: Arc<A>,
    import_id: i64,
    options: Arc<UploadOptions>,
) -> Vec<UnitOutcome> {
    let mut outcomes = Vec::new();

    loop {
        let next = queue.lock().await.recv().await;
        let Some(unit) = next else {
            break;
        };
        outcomes.push(process_unit(api.as_ref(), import_id, unit, &options).await);
    }

    log::debug!(
        "upload worker {} finished after {} units",
        worker_id,
        outcomes.len()
    );
    outcomes
}

/// Upload and verify one unit. Failures are logged and returned as the
/// outcome; temporary artifacts are removed either way.
pub async fn process_unit<A: ImportApi>(
    api: &A,
    import_id: i64,
    unit: UploadUnit,
    options: &UploadOptions,
) -> UnitOutcome {
    let result = transfer_and_verify(api, import_id, &unit, options).await;

    if unit.delete_after_upload {
        log::debug!("removing uploaded file: {}", unit.display_path());
        if let Err(e) = tokio::fs::remove_file(&unit.source_path).await {
            log::warn!("Failed to remove {}: {}", unit.display_path(), e);
        }
    }

    let status = match result {
        Ok(status) => {
            log::info!("Uploaded {}", unit.target_path);
            status
        }
        Err(e) => {
            log::error!("could not upload the file {}: {}", unit.display_path(), e);
            UnitStatus::Failed {
                error: e.to_string(),
            }
        }
    };

    UnitOutcome { unit, status }
}

async fn transfer_and_verify<A: ImportApi>(
    api: &A,
    import_id: i64,
    unit: &UploadUnit,
    options: &UploadOptions,
) -> AppResult<UnitStatus> {
    let session = upload_unit(api, import_id, unit, options).await?;

    if options.dry_run {
        return Ok(UnitStatus::DryRun {
            transfer_id: session.transfer_id,
        });
    }

    verify_upload(api, unit, &session.transfer_id, options).await?;
    Ok(UnitStatus::Verified {
        transfer_id: session.transfer_id,
    })
}
