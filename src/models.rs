use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Flowfile state reported once all chunks have been joined on the server.
pub const FLOWFILE_ASSEMBLED: i32 = 2;
/// Flowfile states reported when joining the chunks failed.
pub const FLOWFILE_FAILED: [i32; 2] = [3, 5];

pub const IMPORT_UPLOAD_FINISHED: i32 = 4;
pub const IMPORT_FINISHED: i32 = 5;
pub const IMPORT_FAILED: i32 = -1;

/// One transferable object: an original file or a synthetic zip archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadUnit {
    pub source_path: PathBuf,
    /// POSIX-style path the server stores the file under.
    pub target_path: String,
    /// Remove the local artifact once the unit has been processed.
    pub delete_after_upload: bool,
    pub imported: bool,
}

impl UploadUnit {
    pub fn new(source_path: impl Into<PathBuf>, target_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            target_path: target_path.into(),
            delete_after_upload: false,
            imported: false,
        }
    }

    pub fn temporary(source_path: impl Into<PathBuf>, target_path: impl Into<String>) -> Self {
        Self {
            delete_after_upload: true,
            ..Self::new(source_path, target_path)
        }
    }

    /// Base name of the source file, sent as the multipart file name.
    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string()
    }

    /// Last component of the target path.
    pub fn target_base_name(&self) -> &str {
        base_name(&self.target_path)
    }

    pub fn display_path(&self) -> String {
        self.source_path.display().to_string()
    }
}

/// Last component of a `/`-separated path as reported by the server.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportPackage {
    pub id: i64,
    #[serde(default)]
    pub state: i32,
    #[serde(default)]
    pub complete_date: Option<String>,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub modified_date: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub extract_zip_files: bool,
    #[serde(default)]
    pub import_file: Option<String>,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub nof_retries: i32,
    #[serde(default)]
    pub target_id: Option<i64>,
    #[serde(default)]
    pub target_type: Option<i32>,
    #[serde(default)]
    pub timeline_items: Vec<i64>,
    #[serde(default)]
    pub user: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressTasks {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub finished: i64,
    #[serde(default)]
    pub error: i64,
    #[serde(default)]
    pub ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub state: i32,
    #[serde(default)]
    pub progress: i32,
    #[serde(default)]
    pub tasks: ProgressTasks,
}

impl ImportProgress {
    /// Upload or import reported done.
    pub fn is_finished(&self) -> bool {
        self.state == IMPORT_UPLOAD_FINISHED || self.state == IMPORT_FINISHED
    }

    pub fn is_fully_imported(&self) -> bool {
        self.state == IMPORT_FINISHED && self.progress == 100
    }

    pub fn is_failed(&self) -> bool {
        self.state == IMPORT_FAILED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowFileState {
    Assembling,
    Assembled,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowFile {
    pub state: i32,
    #[serde(default)]
    pub content_hash: String,
}

impl FlowFile {
    pub fn status(&self) -> FlowFileState {
        match self.state {
            FLOWFILE_ASSEMBLED => FlowFileState::Assembled,
            s if FLOWFILE_FAILED.contains(&s) => FlowFileState::Failed,
            _ => FlowFileState::Assembling,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFile {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub sha1: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportResult {
    #[serde(default)]
    pub datafiles: Vec<DataFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyResponse {
    pub key: String,
}
