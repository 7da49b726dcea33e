//! Script discovery.
//!
//! Deployment order is the lexicographic order of file names, nothing more.
//! Scripts that must run in sequence use numeric prefixes (`001_`, `002_`).

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// List `.js` files directly under `dir`, sorted by file name.
///
/// A missing directory, a non-directory path, and zero matches each log a
/// diagnostic and yield an empty vector; the caller decides that an empty
/// set fails the run. Subdirectories are not descended into.
pub fn find_js_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        error!("directory not found: {}", dir.display());
        return Ok(Vec::new());
    }
    if !dir.is_dir() {
        error!("path is not a directory: {}", dir.display());
        return Ok(Vec::new());
    }

    let entries =
        fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.context("read directory entry")?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) == Some("js") {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    if files.is_empty() {
        warn!("no .js files found in {}", dir.display());
        return Ok(files);
    }

    info!("found {} script file(s) in {}", files.len(), dir.display());
    for file in &files {
        info!("  - {}", file_name(file));
    }

    Ok(files)
}

/// File name for display; falls back to the full path for odd inputs.
pub fn file_name(path: &Path) -> String {
    match path.file_name() {
        Some(name) => name.to_string_lossy().to_string(),
        None => path.display().to_string(),
    }
}
