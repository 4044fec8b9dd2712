use std::path::PathBuf;

use crate::models::UploadUnit;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// All chunks sent and the server hash matched.
    Verified { transfer_id: String },
    /// Chunks were built but not sent.
    DryRun { transfer_id: String },
    Failed { error: String },
}

/// What happened to one unit taken off the queue.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub unit: UploadUnit,
    pub status: UnitStatus,
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self.status, UnitStatus::Failed { .. })
    }

    pub fn transfer_id(&self) -> Option<&str> {
        match &self.status {
            UnitStatus::Verified { transfer_id } | UnitStatus::DryRun { transfer_id } => {
                Some(transfer_id)
            }
            UnitStatus::Failed { .. } => None,
        }
    }
}

/// Outcomes of the upload phase, merged from all workers.
#[derive(Debug, Clone, Default)]
pub struct UploadReport {
    pub outcomes: Vec<UnitOutcome>,
    /// Set when the bundler stopped before every zip candidate was packed.
    pub bundling_error: Option<String>,
}

impl UploadReport {
    pub fn extend(&mut self, outcomes: Vec<UnitOutcome>) {
        self.outcomes.extend(outcomes);
    }

    pub fn successful(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> Vec<&UnitOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success()).collect()
    }

    pub fn is_complete_success(&self) -> bool {
        self.bundling_error.is_none() && self.failed().is_empty()
    }

    pub fn log_summary(&self) {
        log::info!(
            "Upload finished: {}/{} units successful, {} failed",
            self.successful(),
            self.outcomes.len(),
            self.failed().len()
        );

        for outcome in self.failed() {
            if let UnitStatus::Failed { error } = &outcome.status {
                log::warn!("  {} - {}", outcome.unit.display_path(), error);
            }
        }

        if let Some(error) = &self.bundling_error {
            log::warn!("  zip bundling stopped early: {}", error);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStatus {
    Imported,
    Failed,
    /// The local hash could not be computed.
    Unknown,
}

impl ReconcileStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ReconcileStatus::Imported => "IMPORTED:",
            ReconcileStatus::Failed => "FAILED:  ",
            ReconcileStatus::Unknown => "UNKNOWN: ",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileEntry {
    pub source_path: PathBuf,
    pub datafile_id: i64,
    pub status: ReconcileStatus,
}
