use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::time::Duration;

use watcher::{
    asset::AssetClient,
    cleanup::InputCleanup,
    config::WatcherConfig,
    publish, scan,
    status::StatusSnapshot,
    tracker::JobTracker,
    transfer,
};

/// Transcode watcher daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG still wins over --verbose when set
    let mut builder = env_logger::Builder::from_default_env();
    builder.format_timestamp_secs();
    if args.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    let cfg = WatcherConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    info!("Transcode watcher starting");
    info!("  Editor output: {}", cfg.editor_output_dir.display());
    info!("  Descriptor dir: {}", cfg.descriptor_dir.display());
    info!("  Publish input: {}", cfg.publish_input_dir.display());
    info!("  Poll interval: {}s", cfg.poll_interval_secs);
    info!("  Remote API: {}", cfg.api.base_uri);

    check_paths(&cfg)?;

    let mut tracker = JobTracker::new();
    let mut cleanup = InputCleanup::new();
    let mut client = AssetClient::new(cfg.api.clone());

    loop {
        if let Err(e) = tick(&cfg, &mut tracker, &mut client, &mut cleanup).await {
            // abandoned tick; state is intact and the next interval retries
            error!("Tick failed: {:#}", e);
        }
        tokio::time::sleep(Duration::from_secs(cfg.poll_interval_secs)).await;
    }
}

/// Every configured directory must exist before the loop starts
fn check_paths(cfg: &WatcherConfig) -> Result<()> {
    for (label, path) in cfg.required_dirs() {
        if !path.exists() {
            bail!("Invalid {} folder: {}", label, path.display());
        }
    }
    debug!("All paths are valid");
    Ok(())
}

/// One poll tick: feed the transcoder, diff descriptors, deliver published
/// material, then persist the status snapshot.
async fn tick(
    cfg: &WatcherConfig,
    tracker: &mut JobTracker,
    client: &mut AssetClient,
    cleanup: &mut InputCleanup,
) -> Result<()> {
    check_editor_output(cfg, client, cleanup).await?;
    check_descriptors(cfg, tracker, client, cleanup).await?;
    check_publish_input(cfg, client).await?;

    if let Err(e) = StatusSnapshot::capture(tracker, cfg.recent_jobs).write(&cfg.status_file) {
        warn!("Could not write status snapshot: {:#}", e);
    }
    cleanup.flush();
    Ok(())
}

/// Move fresh renders into the transcoder input folder matching the
/// asset's resolution, remembering them for cleanup after the job ends.
async fn check_editor_output(
    cfg: &WatcherConfig,
    client: &mut AssetClient,
    cleanup: &mut InputCleanup,
) -> Result<()> {
    let files = scan::list_files(&cfg.editor_output_dir, &cfg.editor_output_extension)?;
    for file in files {
        let Some(title) = scan::file_stem(&file) else {
            continue;
        };

        let metadata = match client.get_metadata(&title).await {
            Ok(metadata) => metadata,
            Err(e) => {
                // leave the file in place; looked up again next tick
                warn!("No metadata for render [{}]: {:#}", title, e);
                continue;
            }
        };
        let resolution = metadata
            .get("resolution")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("SD");
        let destination_dir = if resolution == "HD" {
            &cfg.transcoder_input_hd_dir
        } else {
            &cfg.transcoder_input_sd_dir
        };

        let destination =
            destination_dir.join(format!("{}.{}", title, cfg.editor_output_extension));
        transfer::move_file(&file, &destination)?;
        info!("Moved {} to transcoder {} input", title, resolution);
        cleanup.register(&title, destination);
    }
    Ok(())
}

/// Diff the descriptor directory and dispatch the resulting transitions
async fn check_descriptors(
    cfg: &WatcherConfig,
    tracker: &mut JobTracker,
    client: &mut AssetClient,
    cleanup: &mut InputCleanup,
) -> Result<()> {
    let ids = scan::list_ids(&cfg.descriptor_dir, &cfg.descriptor_extension)?;
    let transitions = tracker.scan(&ids, |id| {
        scan::read_descriptor(&cfg.descriptor_dir, id, &cfg.descriptor_extension)
    });

    for job in transitions {
        let title = job.source_name.clone();
        if job.is_terminal() {
            if !cleanup.claim(&title) {
                // not an input we moved in; descriptor predates this run
                continue;
            }
            info!("Job {:?}: {}", job.status, title);
            if let Err(e) = client.launch_import_workflow(&title, &job).await {
                warn!("Import workflow failed for [{}]: {:#}", title, e);
            }
        } else {
            debug!("Job updated: {} progress={}", title, job.progress);
            if let Err(e) = client.report_progress(&title, job.progress).await {
                warn!("Progress update failed for [{}]: {:#}", title, e);
            }
        }
    }
    Ok(())
}

/// Deliver files the transcoder dropped into the publish input folder
async fn check_publish_input(cfg: &WatcherConfig, client: &mut AssetClient) -> Result<()> {
    let files = scan::list_files(&cfg.publish_input_dir, &cfg.publish_input_extension)?;
    for file in files {
        let Some(title) = scan::file_stem(&file) else {
            continue;
        };
        info!("Publishing: {}", title);

        match publish::copy_master(cfg, client, &title).await {
            Ok(true) => {}
            Ok(false) => warn!("No master located for [{}]", title),
            Err(e) => {
                warn!("Master copy failed for [{}]: {:#}", title, e);
                continue;
            }
        }
        if let Err(e) = publish::deliver(cfg, client, &title).await {
            warn!("Delivery failed for [{}]: {:#}", title, e);
            continue;
        }
        client.forget(&title);
    }
    Ok(())
}
