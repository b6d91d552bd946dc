use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;
use std::fs;

/// Move a file, logging the transfer
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    debug!("move: {} => {}", from.display(), to.display());
    fs::rename(from, to)
        .with_context(|| format!("Failed to move {} to {}", from.display(), to.display()))?;
    Ok(())
}

/// Copy a file, logging the transfer
pub fn copy_file(from: &Path, to: &Path) -> Result<()> {
    debug!("copy: {} => {}", from.display(), to.display());
    fs::copy(from, to)
        .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
    Ok(())
}

/// Delete a file, logging the removal
pub fn delete_file(path: &Path) -> Result<()> {
    debug!("delete: {}", path.display());
    fs::remove_file(path).with_context(|| format!("Failed to delete {}", path.display()))?;
    Ok(())
}

/// Probe the configured search roots for a rendered master file.
///
/// Returns the first root that actually holds the file.
pub fn find_file(name: &str, roots: &[PathBuf]) -> Option<PathBuf> {
    for root in roots {
        let candidate = root.join(name);
        if candidate.exists() {
            return Some(candidate);
        }
        debug!("no such path: {}", candidate.display());
    }
    None
}

/// Platform names may carry characters unusable in directory names
pub fn sanitize_platform_name(name: &str) -> String {
    name.replace(':', "-")
}
