use std::fs;

use anyhow::{Context, Result};
use log::{info, warn};
use serde_json::{json, Value};

use crate::asset::AssetClient;
use crate::config::WatcherConfig;
use crate::transfer;

/// Copy the rendered master referenced by the asset's metadata into the
/// source-copy directory.
///
/// Returns false when no master could be located on any search root.
pub async fn copy_master(
    cfg: &WatcherConfig,
    client: &mut AssetClient,
    title: &str,
) -> Result<bool> {
    let metadata = client.get_metadata(title).await?;
    for item in destinations(&metadata) {
        let Some(name) = output_filename(&item) else {
            continue;
        };
        if !name.ends_with(".mxf") {
            continue;
        }
        if let Some(found) = transfer::find_file(&name, &cfg.search_roots) {
            transfer::copy_file(&found, &cfg.source_copy_dir.join(&name))?;
            return Ok(true);
        }
    }
    Ok(false)
}

/// Deliver a published title.
///
/// For every destination platform in the asset's metadata the output is
/// copied into the per-platform delivery tree; the publish file itself is
/// then handed to the importer drop and the asset marked published.
pub async fn deliver(cfg: &WatcherConfig, client: &mut AssetClient, title: &str) -> Result<()> {
    let metadata = client.get_metadata(title).await?;

    let folder = metadata
        .get("filename")
        .and_then(Value::as_str)
        .unwrap_or(title)
        .to_string();
    let resolution = metadata
        .get("resolution")
        .and_then(Value::as_str)
        .unwrap_or("SD");
    let ext = publish_extension(resolution);
    let publish_file = cfg.publish_input_dir.join(format!("{}.{}", title, ext));

    for item in destinations(&metadata) {
        let platform = item
            .get("name")
            .and_then(Value::as_str)
            .map(transfer::sanitize_platform_name)
            .unwrap_or_default();
        if platform.is_empty() {
            continue;
        }
        let dir = cfg.publish_output_dir.join(&platform).join(&folder);
        if !dir.exists() {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create delivery dir: {}", dir.display()))?;
        }

        match output_filename(&item) {
            Some(name) if name.ends_with(".mxf") => {
                match transfer::find_file(&name, &cfg.search_roots) {
                    Some(found) => transfer::copy_file(&found, &dir.join(&name))?,
                    None => warn!("Master not found on any root: {}", name),
                }
            }
            _ => {
                transfer::copy_file(&publish_file, &dir.join(format!("{}.{}", title, ext)))?;
            }
        }
    }

    transfer::move_file(
        &publish_file,
        &cfg.import_drop_dir.join(format!("{}.{}", title, ext)),
    )?;
    client
        .update_metadata(title, &json!({"state": "published"}))
        .await?;
    info!("Delivered [{}] as {}", title, ext);
    Ok(())
}

/// HD material publishes as transport stream, SD as program stream
fn publish_extension(resolution: &str) -> &'static str {
    if resolution == "HD" {
        "m2t"
    } else {
        "mpg"
    }
}

fn destinations(metadata: &Value) -> Vec<Value> {
    metadata
        .get("destination")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn output_filename(item: &Value) -> Option<String> {
    item.get("output-filename")
        .and_then(Value::as_str)
        .map(str::to_string)
}
