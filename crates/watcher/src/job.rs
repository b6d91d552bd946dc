use std::path::PathBuf;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a transcoding job as reported by its descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and Failed jobs never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One parsed observation of a job descriptor.
///
/// A record is immutable once built; the tracker replaces the whole record
/// on change rather than mutating fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Descriptor file name without extension; stable across polls
    pub id: String,
    /// Declared descriptor type tag (only one kind is ever accepted)
    pub kind: String,
    /// Base name of the input media, extension stripped
    pub source_name: String,
    /// Submission time extracted from the descriptor; None sorts last
    pub queued_at: Option<NaiveDateTime>,
    pub status: JobStatus,
    /// Percent as reported by the engine; not range-checked
    pub progress: u32,
    /// Error payload, present only for failed jobs
    pub error: Option<String>,
    /// Output path, present only for completed jobs
    pub destination: Option<PathBuf>,
    /// Output size in bytes, present only for completed jobs
    pub file_size: Option<u64>,
    /// Descriptor mtime at read time; completion timestamp surrogate
    pub observed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
