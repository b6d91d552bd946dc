use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use walkdir::WalkDir;

use crate::tracker::DescriptorSource;

/// List files with the given extension directly inside `dir`.
///
/// Subdirectories and dot-files are ignored; the result is sorted by file
/// name so poll ticks process ids in a stable order.
pub fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if name.starts_with('.') {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

/// Descriptor ids currently on disk: file names with the extension stripped.
pub fn list_ids(dir: &Path, extension: &str) -> Result<Vec<String>> {
    let files = list_files(dir, extension)?;
    Ok(files
        .iter()
        .filter_map(|p| p.file_stem().and_then(|s| s.to_str()))
        .map(str::to_string)
        .collect())
}

/// Read one descriptor's text and modification time.
///
/// The file may have vanished since listing; the caller treats the error
/// as a skip for the current tick.
pub fn read_descriptor(dir: &Path, id: &str, extension: &str) -> Result<DescriptorSource> {
    let path = dir.join(format!("{}.{}", id, extension));
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read descriptor: {}", path.display()))?;
    let modified = std::fs::metadata(&path)
        .and_then(|m| m.modified())
        .with_context(|| format!("Failed to stat descriptor: {}", path.display()))?;
    Ok(DescriptorSource {
        text,
        modified: DateTime::<Utc>::from(modified),
    })
}

/// File name without its final extension, as a string.
pub fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lists_only_matching_top_level_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("job1.pws"), "x").unwrap();
        std::fs::write(dir.path().join("job2.pws"), "x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".hidden.pws"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("job3.pws"), "x").unwrap();

        let ids = list_ids(dir.path(), "pws").unwrap();
        assert_eq!(ids, ["job1", "job2"]);
    }

    #[test]
    fn empty_directory_lists_nothing() {
        let dir = TempDir::new().unwrap();
        assert!(list_ids(dir.path(), "pws").unwrap().is_empty());
    }

    #[test]
    fn reads_descriptor_text_and_mtime() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("job1.pws"), "<cnpsXML/>").unwrap();

        let source = read_descriptor(dir.path(), "job1", "pws").unwrap();
        assert_eq!(source.text, "<cnpsXML/>");
        assert!(source.modified <= Utc::now());
    }

    #[test]
    fn read_of_missing_descriptor_fails() {
        let dir = TempDir::new().unwrap();
        assert!(read_descriptor(dir.path(), "gone", "pws").is_err());
    }

    #[test]
    fn stem_strips_extension() {
        assert_eq!(
            file_stem(Path::new("/a/b/title.avi")),
            Some("title".to_string())
        );
    }
}
