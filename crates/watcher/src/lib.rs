pub mod config;
pub mod job;
pub mod descriptor;
pub mod tracker;
pub mod scan;
pub mod asset;
pub mod transfer;
pub mod publish;
pub mod cleanup;
pub mod status;

pub use config::{ApiConfig, WatcherConfig};
pub use job::{JobRecord, JobStatus};
pub use tracker::{DescriptorSource, JobTracker};
pub use status::StatusSnapshot;
