use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the transcode watcher daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Directory the editing workstation renders finished media into
    pub editor_output_dir: PathBuf,
    /// Transcoder input folder for SD material
    pub transcoder_input_sd_dir: PathBuf,
    /// Transcoder input folder for HD material
    pub transcoder_input_hd_dir: PathBuf,
    /// Directory of per-job status descriptors written by the engine
    pub descriptor_dir: PathBuf,
    /// Directory the transcoder drops publish-ready files into
    pub publish_input_dir: PathBuf,
    /// Root of the per-platform delivery tree
    pub publish_output_dir: PathBuf,
    /// Directory that receives a copy of located master files
    pub source_copy_dir: PathBuf,
    /// Drop directory watched by the asset-management importer
    pub import_drop_dir: PathBuf,
    /// Roots probed when locating rendered master files
    pub search_roots: Vec<PathBuf>,
    /// Extension of descriptor files, without the dot
    pub descriptor_extension: String,
    /// Extension of media rendered by the editor
    pub editor_output_extension: String,
    /// Extension of publish input files
    pub publish_input_extension: String,
    /// Seconds between poll ticks
    pub poll_interval_secs: u64,
    /// Where the per-tick status snapshot is written
    pub status_file: PathBuf,
    /// How many history entries the snapshot carries
    pub recent_jobs: usize,
    /// Remote asset-management service
    pub api: ApiConfig,
}

/// Connection settings for the asset-management service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Service base URI, no trailing slash
    pub base_uri: String,
    pub workspace_id: u64,
    pub metadata_definition_id: u64,
    /// Workflow definition launched when a job reaches a terminal state
    pub import_workflow_id: u64,
    pub user: String,
    pub pass: String,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl WatcherConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            editor_output_dir: PathBuf::from("/srv/transcode/editor-out"),
            transcoder_input_sd_dir: PathBuf::from("/srv/transcode/input-sd"),
            transcoder_input_hd_dir: PathBuf::from("/srv/transcode/input-hd"),
            descriptor_dir: PathBuf::from("/srv/transcode/status"),
            publish_input_dir: PathBuf::from("/srv/transcode/publish-in"),
            publish_output_dir: PathBuf::from("/srv/transcode/publish-out"),
            source_copy_dir: PathBuf::from("/srv/transcode/source-copy"),
            import_drop_dir: PathBuf::from("/srv/transcode/import-drop"),
            search_roots: vec![
                PathBuf::from("/mnt/render-a"),
                PathBuf::from("/mnt/render-b"),
            ],
            descriptor_extension: "pws".to_string(),
            editor_output_extension: "avi".to_string(),
            publish_input_extension: "m2t".to_string(),
            poll_interval_secs: 1,
            status_file: PathBuf::from("/tmp/transcode-watcher/status.json"),
            recent_jobs: 10,
            api: ApiConfig {
                base_uri: "http://localhost:8080/api".to_string(),
                workspace_id: 0,
                metadata_definition_id: 0,
                import_workflow_id: 0,
                user: String::new(),
                pass: String::new(),
            },
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path).with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    let file_config: WatcherConfig = toml::from_str(&content).with_context(|| {
                        format!("Failed to parse TOML config: {}", config_path.display())
                    })?;
                    config = file_config;
                } else {
                    let file_config: WatcherConfig =
                        serde_json::from_str(&content).with_context(|| {
                            format!("Failed to parse JSON config: {}", config_path.display())
                        })?;
                    config = file_config;
                }
            }
        }

        Ok(config)
    }

    /// All directories the daemon requires at startup
    pub fn required_dirs(&self) -> Vec<(&'static str, &Path)> {
        vec![
            ("editor output", &self.editor_output_dir),
            ("transcoder SD input", &self.transcoder_input_sd_dir),
            ("transcoder HD input", &self.transcoder_input_hd_dir),
            ("descriptor", &self.descriptor_dir),
            ("publish input", &self.publish_input_dir),
            ("publish output", &self.publish_output_dir),
            ("source copy", &self.source_copy_dir),
            ("import drop", &self.import_drop_dir),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let config = WatcherConfig::default_config();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: WatcherConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.descriptor_extension, "pws");
        assert_eq!(parsed.poll_interval_secs, config.poll_interval_secs);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config =
            WatcherConfig::load_config(Some(Path::new("/definitely/not/here.json"))).unwrap();
        assert_eq!(config.recent_jobs, 10);
    }
}
