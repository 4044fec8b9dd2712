use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::client::{CompleteParams, ImportApi};
use crate::errors::{AppError, AppResult};
use crate::models::{base_name, DataFile, ImportPackage, ImportProgress, ImportResult, UploadUnit};

use super::report::{ReconcileEntry, ReconcileStatus};
use super::verify::{hash_file_async, HashAlgorithm};

/// How long to follow the import after it has been completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub wait: bool,
    /// Wait for the full import and reconcile the imported files.
    pub verify: bool,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl WaitOptions {
    /// A negative `timeout_secs` means no timeout. Verifying implies waiting.
    pub fn new(wait: bool, verify: bool, timeout_secs: i64) -> Self {
        Self {
            wait: wait || verify,
            verify,
            timeout: u64::try_from(timeout_secs).ok().map(Duration::from_secs),
        }
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::new(true, false, -1)
    }
}

pub async fn create_import_session<A: ImportApi>(api: &A) -> AppResult<ImportPackage> {
    let package = api.create_import().await?;
    log::debug!("created import session {}", package.id);
    Ok(package)
}

pub async fn complete_import<A: ImportApi>(
    api: &A,
    import_id: i64,
    params: &CompleteParams,
) -> AppResult<()> {
    log::debug!("completing import {} with {:?}", import_id, params.to_body());
    api.complete_import(import_id, params).await
}

/// Poll the import progress every `poll_interval` until it is done.
///
/// Without `verify`, an upload- or import-finished state ends the wait. With
/// it, only the fully imported state (import finished at 100%) does.
pub async fn wait_for_import<A: ImportApi>(
    api: &A,
    import_id: i64,
    wait: &WaitOptions,
    poll_interval: Duration,
) -> AppResult<ImportProgress> {
    if wait.verify {
        log::info!("Waiting for the Imports to finish...");
    } else {
        log::info!("Waiting for the Uploads to finish...");
    }

    let start_time = Instant::now();
    loop {
        if let Some(timeout) = wait.timeout {
            if start_time.elapsed() >= timeout {
                return Err(AppError::ProgressTimeout {
                    seconds: timeout.as_secs(),
                });
            }
        }

        let progress = api.import_progress(import_id).await?;
        log::debug!(
            "import {}: state {}, {}% ({}/{} tasks finished, {} failed)",
            import_id,
            progress.state,
            progress.progress,
            progress.tasks.finished,
            progress.tasks.count,
            progress.tasks.error
        );

        if progress.is_finished() {
            if !wait.verify || progress.is_fully_imported() {
                return Ok(progress);
            }
        } else if progress.is_failed() {
            return Err(AppError::ImportFailed);
        }

        sleep(poll_interval).await;
    }
}

/// Fetch the import result and match the server's datafiles against the
/// local files.
pub async fn reconcile_import<A: ImportApi>(
    api: &A,
    import_id: i64,
    units: &mut [UploadUnit],
) -> AppResult<Vec<ReconcileEntry>> {
    log::info!("Checking Imports:");
    log::info!("-----------------");

    let results = api.import_result(import_id).await?;
    Ok(reconcile_datafiles(units, results).await)
}

/// Datafiles of all result pages, one per server id. A later entry replaces
/// an earlier one with the same id.
pub fn dedup_datafiles(results: Vec<ImportResult>) -> Vec<DataFile> {
    let mut unique = BTreeMap::new();
    for datafile in results.into_iter().flat_map(|r| r.datafiles) {
        unique.insert(datafile.id, datafile);
    }
    unique.into_values().collect()
}

/// Mark every unit whose SHA-1 equals the digest of the datafile with the
/// same base name as imported.
///
/// Each datafile is matched against the first unit with its base name that
/// is not imported yet. Mismatches are recorded, never fatal.
pub async fn reconcile_datafiles(
    units: &mut [UploadUnit],
    results: Vec<ImportResult>,
) -> Vec<ReconcileEntry> {
    if results.first().map_or(true, |r| r.datafiles.is_empty()) {
        return Vec::new();
    }

    let mut entries = Vec::new();
    for datafile in dedup_datafiles(results) {
        let name = base_name(&datafile.name);
        let Some(unit) = units
            .iter_mut()
            .find(|u| !u.imported && u.target_base_name() == name)
        else {
            continue;
        };

        let status = match hash_file_async(unit.source_path.clone(), HashAlgorithm::Sha1).await {
            Ok(local) if local.eq_ignore_ascii_case(&datafile.sha1) => {
                unit.imported = true;
                ReconcileStatus::Imported
            }
            Ok(_) => ReconcileStatus::Failed,
            Err(e) => {
                log::debug!("could not hash {}: {}", unit.display_path(), e);
                ReconcileStatus::Unknown
            }
        };

        log::info!("{} {}", status.label(), unit.display_path());
        entries.push(ReconcileEntry {
            source_path: unit.source_path.clone(),
            datafile_id: datafile.id,
            status,
        });
    }

    entries
}
