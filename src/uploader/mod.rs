// Upload engine - drives one import from the local paths to the reconciled result
//
// classify -> (bundler) -> upload_queue -> chunked -> verify -> import

pub mod bundler;
pub mod chunked;
pub mod classify;
pub mod import;
pub mod report;
pub mod retry;
pub mod upload_queue;
pub mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::client::{CompleteParams, ImportApi};
use crate::config::UploadOptions;
use crate::errors::AppResult;
use crate::models::{ImportProgress, UploadUnit};

pub use import::WaitOptions;
pub use report::{ReconcileEntry, ReconcileStatus, UnitOutcome, UnitStatus, UploadReport};
pub use upload_queue::process_upload_queue;

/// Everything one run needs to know besides the engine tunables.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub paths: Vec<PathBuf>,
    pub complete: CompleteParams,
    pub wait: WaitOptions,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub import_id: i64,
    pub report: UploadReport,
    /// Last progress seen, when the run waited for the import.
    pub progress: Option<ImportProgress>,
    pub reconciliation: Vec<ReconcileEntry>,
    /// The original files of the run, with their `imported` flags.
    pub units: Vec<UploadUnit>,
}

impl UploadOutcome {
    pub fn all_imported(&self) -> bool {
        self.units.iter().all(|u| u.imported)
    }
}

/// Run a complete import: create the session, upload every file, complete
/// the session and optionally wait for it and reconcile the result.
///
/// Failures of single files are part of the returned report; errors of the
/// import session itself end the run.
pub async fn upload<A: ImportApi>(
    api: Arc<A>,
    request: UploadRequest,
    options: UploadOptions,
) -> AppResult<UploadOutcome> {
    log::info!("Preparing Data:");
    log::info!("-----------------");
    let classification = classify::analyse_paths(&request.paths, options.chunk_size);
    if !classification.files_only {
        log::info!(
            "Found {} files larger than {}MB which will be uploaded directly",
            classification.direct.len(),
            options.chunk_size / 1024 / 1024
        );
        log::info!(
            "Found {} files which will be zipped and uploaded",
            classification.zip_candidates.len()
        );
    }
    let mut units = classification.all_units();

    log::info!("Uploading Data:");
    log::info!("-----------------");
    if options.dry_run {
        log::warn!("Dry run: no file content will be transferred");
    }

    let import_package = import::create_import_session(api.as_ref()).await?;

    // Removed on drop, whichever way this function returns.
    let temp_dir = tempfile::Builder::new().prefix("agora_app").tempdir()?;

    let report = process_upload_queue(
        api.clone(),
        import_package.id,
        classification.direct,
        classification.zip_candidates,
        temp_dir.path().to_path_buf(),
        Arc::new(options.clone()),
    )
    .await;
    report.log_summary();

    if let Err(e) = temp_dir.close() {
        log::warn!("Failed to remove temporary directory: {}", e);
    }

    import::complete_import(api.as_ref(), import_package.id, &request.complete).await?;

    let mut outcome = UploadOutcome {
        import_id: import_package.id,
        report,
        progress: None,
        reconciliation: Vec::new(),
        units: Vec::new(),
    };

    if request.wait.wait {
        let progress = import::wait_for_import(
            api.as_ref(),
            import_package.id,
            &request.wait,
            options.progress_poll_interval,
        )
        .await?;
        outcome.progress = Some(progress);

        if request.wait.verify {
            outcome.reconciliation =
                import::reconcile_import(api.as_ref(), import_package.id, &mut units).await?;
            if units.iter().all(|u| u.imported) {
                log::info!("All files were imported successfully!");
            } else {
                log::error!("Not all files were imported successfully!");
            }
        }
    }

    outcome.units = units;
    Ok(outcome)
}

/// Whether `--extract-zip` can have an effect on `path`; warns when not.
pub fn extract_zip_applies(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(m) if m.is_dir() => {
            log::warn!(
                "\"--extract-zip\" has no effect when uploading a directory and will be ignored"
            );
            false
        }
        Ok(_) if path.extension().and_then(|e| e.to_str()) != Some("zip") => {
            log::warn!("no zip file found. \"--extract-zip\" will be ignored");
            false
        }
        Ok(_) => true,
        Err(_) => false,
    }
}
