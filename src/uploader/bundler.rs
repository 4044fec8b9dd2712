use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::errors::{AppError, AppResult};
use crate::models::UploadUnit;

/// A closed zip archive waiting to be uploaded.
#[derive(Debug, Clone)]
pub struct ZipBundle {
    pub path: PathBuf,
    pub name: String,
    /// Target paths of the bundled files, in insertion order.
    pub entries: Vec<String>,
    pub size: u64,
}

impl ZipBundle {
    /// The archive as a unit that is removed once uploaded.
    pub fn into_unit(self) -> UploadUnit {
        UploadUnit::temporary(self.path, self.name)
    }
}

/// A zip candidate that could not be read into any archive.
#[derive(Debug)]
pub struct SkippedFile {
    pub unit: UploadUnit,
    pub error: AppError,
}

#[derive(Debug, Default)]
pub struct BundleSummary {
    pub archives: usize,
    pub skipped: Vec<SkippedFile>,
}

/// Pack `candidates` into archives of roughly `max_zip_size` bytes inside
/// `temp_dir`, handing every closed archive to `emit`.
///
/// The size is checked after each file has been added, so the file that
/// pushes an archive over the limit is still part of it. A candidate that
/// cannot be read is skipped and listed in the summary; only errors on the
/// archive itself end the bundling.
pub fn bundle_files<F>(
    candidates: &[UploadUnit],
    temp_dir: &Path,
    max_zip_size: u64,
    mut emit: F,
) -> AppResult<BundleSummary>
where
    F: FnMut(ZipBundle) -> AppResult<()>,
{
    let mut index = 0;
    let mut summary = BundleSummary::default();

    while index < candidates.len() {
        let name = format!("upload_{}.agora_upload", index);
        let path = temp_dir.join(&name);
        log::debug!("creating zip file: {}", path.display());

        let mut writer = ZipWriter::new(File::create(&path)?);
        let mut entries = Vec::new();

        while index < candidates.len() {
            let candidate = &candidates[index];
            index += 1;
            log::debug!(
                "adding file to zip: {} (path in zipfile: {})",
                candidate.display_path(),
                candidate.target_path
            );

            if let Err(error) = add_entry(&mut writer, candidate) {
                log::error!(
                    "could not add {} to {}: {}",
                    candidate.display_path(),
                    name,
                    error
                );
                summary.skipped.push(SkippedFile {
                    unit: candidate.clone(),
                    error,
                });
                continue;
            }
            // Push the compressor's buffered output to disk before measuring.
            writer.flush()?;
            entries.push(candidate.target_path.clone());

            if fs::metadata(&path)?.len() > max_zip_size {
                log::debug!(
                    "zip file exceeded {} MB --> uploading it",
                    max_zip_size / 1024 / 1024
                );
                break;
            }
        }

        writer.finish()?;

        if entries.is_empty() {
            fs::remove_file(&path)?;
            continue;
        }

        let size = fs::metadata(&path)?.len();
        log::info!(
            "Bundled {} files into {} ({:.2} MB)",
            entries.len(),
            name,
            size as f64 / 1024.0 / 1024.0
        );

        summary.archives += 1;
        emit(ZipBundle {
            path,
            name,
            entries,
            size,
        })?;
    }

    Ok(summary)
}

/// Copy one candidate into the archive. A failed copy leaves no partial
/// entry behind.
fn add_entry(writer: &mut ZipWriter<File>, candidate: &UploadUnit) -> AppResult<()> {
    let mut source = File::open(&candidate.source_path)?;
    let options = FileOptions::<()>::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(source.metadata()?.len() >= u32::MAX as u64);

    writer.start_file(candidate.target_path.as_str(), options)?;
    if let Err(e) = io::copy(&mut source, writer) {
        writer.abort_file()?;
        return Err(e.into());
    }
    Ok(())
}
