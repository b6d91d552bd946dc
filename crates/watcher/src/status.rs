use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobRecord, JobStatus};
use crate::tracker::JobTracker;

/// Per-tick snapshot written for external consumers (the TUI)
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Utc>,
    pub counts: StatusCounts,
    /// Most recently inserted records, most recent first
    pub recent: Vec<JobRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusSnapshot {
    pub fn capture(tracker: &JobTracker, recent: usize) -> Self {
        let mut counts = StatusCounts::default();
        for job in tracker.history() {
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Started => counts.started += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Self {
            generated_at: Utc::now(),
            counts,
            recent: tracker.recent(recent),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create status dir: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize status")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write status file: {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read status file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse status file: {}", path.display()))
    }
}
