use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::descriptor;
use crate::job::{JobRecord, JobStatus};

/// Raw descriptor text plus the file's modification time at read time.
pub struct DescriptorSource {
    pub text: String,
    pub modified: DateTime<Utc>,
}

/// A job as remembered between polls.
///
/// Terminal jobs are frozen: their descriptor is never read or parsed
/// again, even if the file changes on disk.
enum TrackedJob {
    Live(JobRecord),
    Frozen(JobRecord),
}

impl TrackedJob {
    fn from_record(record: JobRecord) -> Self {
        if record.is_terminal() {
            TrackedJob::Frozen(record)
        } else {
            TrackedJob::Live(record)
        }
    }
}

/// Poll-to-poll memory of every job the watcher has accepted.
///
/// `history` holds all records ordered ascending by `queued_at`, unknown
/// submission times last, ties in arrival order. It is never pruned.
#[derive(Default)]
pub struct JobTracker {
    by_id: HashMap<String, TrackedJob>,
    history: Vec<JobRecord>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare one directory snapshot against remembered state.
    ///
    /// `read` supplies raw descriptor content on demand; a read failure
    /// skips that id for this call only. Returns the records that are new
    /// or whose `(status, progress)` changed since the last call.
    pub fn scan<F>(&mut self, ids: &[String], mut read: F) -> Vec<JobRecord>
    where
        F: FnMut(&str) -> Result<DescriptorSource>,
    {
        let mut transitions = Vec::new();

        for id in ids {
            let prior_state = match self.by_id.get(id.as_str()) {
                Some(TrackedJob::Frozen(_)) => continue,
                Some(TrackedJob::Live(record)) => Some((record.status, record.progress)),
                None => None,
            };

            let source = match read(id) {
                Ok(source) => source,
                Err(e) => {
                    warn!("Failed to read descriptor {}: {}", id, e);
                    continue;
                }
            };

            let mut record = match descriptor::parse(id, &source.text) {
                Ok(record) => record,
                Err(rejection) => {
                    debug!("Descriptor {} skipped: {}", id, rejection);
                    continue;
                }
            };
            if record.status == JobStatus::Completed {
                record.observed_at = Some(source.modified);
            }

            match prior_state {
                None => self.insert(record, &mut transitions),
                Some((status, progress)) => {
                    if record.status == status && record.progress == progress {
                        continue;
                    }
                    self.replace(record, &mut transitions);
                }
            }
        }

        transitions
    }

    /// The full ordered history, oldest submission first.
    pub fn history(&self) -> &[JobRecord] {
        &self.history
    }

    /// The most recently inserted `count` records, most recent first.
    pub fn recent(&self, count: usize) -> Vec<JobRecord> {
        self.history.iter().rev().take(count).cloned().collect()
    }

    fn insert(&mut self, record: JobRecord, transitions: &mut Vec<JobRecord>) {
        debug!(
            "New job [{}] {:?} at {}%",
            record.source_name, record.status, record.progress
        );
        let position = self.insert_position(&record);
        self.history.insert(position, record.clone());
        self.by_id
            .insert(record.id.clone(), TrackedJob::from_record(record.clone()));
        transitions.push(record);
    }

    fn replace(&mut self, record: JobRecord, transitions: &mut Vec<JobRecord>) {
        debug!(
            "Job updated [{}] {:?} at {}%",
            record.source_name, record.status, record.progress
        );
        if let Some(slot) = self.history.iter_mut().find(|j| j.id == record.id) {
            *slot = record.clone();
        }
        self.by_id
            .insert(record.id.clone(), TrackedJob::from_record(record.clone()));
        transitions.push(record);
    }

    /// First index whose entry sorts after the new record.
    ///
    /// Records without a submission time always go to the tail; they are
    /// never inserted by comparison.
    fn insert_position(&self, record: &JobRecord) -> usize {
        let Some(queued_at) = record.queued_at else {
            return self.history.len();
        };
        self.history
            .iter()
            .position(|existing| match existing.queued_at {
                Some(existing_at) => existing_at > queued_at,
                None => true,
            })
            .unwrap_or(self.history.len())
    }
}
