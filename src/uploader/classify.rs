use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::models::UploadUnit;

/// Input paths sorted into the two upload routes.
#[derive(Debug, Default)]
pub struct Classification {
    /// Uploaded standalone, in chunks.
    pub direct: Vec<UploadUnit>,
    /// Small files that are bundled into zip archives first.
    pub zip_candidates: Vec<UploadUnit>,
    /// True when none of the inputs was a directory.
    pub files_only: bool,
}

impl Classification {
    /// Every original file, direct ones first.
    pub fn all_units(&self) -> Vec<UploadUnit> {
        self.direct
            .iter()
            .chain(self.zip_candidates.iter())
            .cloned()
            .collect()
    }
}

/// Classify `paths` for upload.
///
/// Missing paths are skipped. Files inside a directory go to the zip route
/// when they are smaller than `chunk_size`; a path given directly is always
/// uploaded standalone under its base name.
pub fn analyse_paths<P: AsRef<Path>>(paths: &[P], chunk_size: u64) -> Classification {
    let mut result = Classification {
        files_only: true,
        ..Classification::default()
    };

    for path in paths {
        let path = path.as_ref();
        let metadata = match fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        if metadata.is_dir() {
            result.files_only = false;
            walk_directory(path, chunk_size, &mut result);
        } else {
            let target = path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string();
            result
                .direct
                .push(UploadUnit::new(absolute_path(path), target));
        }
    }

    result
}

fn walk_directory(root: &Path, chunk_size: u64, result: &mut Classification) {
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("Skipping unreadable entry below {}: {}", root.display(), e);
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                log::warn!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };

        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let unit = UploadUnit::new(entry.path(), posix_path(relative));

        if size < chunk_size {
            result.zip_candidates.push(unit);
        } else {
            result.direct.push(unit);
        }
    }
}

/// Join the components of `path` with `/`.
pub fn posix_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
