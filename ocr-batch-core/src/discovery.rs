//! Scans an input directory for files the provider can OCR.

use crate::contract::FileTask;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Document and image extensions accepted for OCR, compared case-insensitively.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "pdf", "docx", "doc", "png", "jpg", "jpeg", "tiff", "bmp",
];

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("input directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("input path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("failed to list {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn is_supported_extension(extension: &str) -> bool {
    let lower = extension.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.contains(&lower.as_str())
}

/// Lists the qualifying files directly inside `dir`, in directory listing order.
///
/// An empty result is not an error; the caller decides what an empty batch means.
pub fn list_tasks<P: AsRef<Path>>(dir: P) -> Result<Vec<FileTask>, DiscoveryError> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Err(DiscoveryError::DirectoryNotFound(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(DiscoveryError::NotADirectory(dir.to_path_buf()));
    }

    let io_err = |source| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut tasks = Vec::new();
    for entry_res in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry_res.map_err(io_err)?;
        let path = entry.path();
        if !path.is_file() {
            debug!(path = %path.display(), "Skipping non-file entry");
            continue;
        }
        match task_for(&path) {
            Some(task) => {
                debug!(path = %path.display(), extension = %task.extension, "Discovered file");
                tasks.push(task);
            }
            None => debug!(path = %path.display(), "Skipping unsupported file"),
        }
    }

    warn_on_collisions(&tasks);
    info!(dir = %dir.display(), count = tasks.len(), "Discovery complete");
    Ok(tasks)
}

fn task_for(path: &Path) -> Option<FileTask> {
    let extension = path.extension()?.to_string_lossy().to_ascii_lowercase();
    if !is_supported_extension(&extension) {
        return None;
    }
    let base_name = path.file_stem()?.to_string_lossy().into_owned();
    Some(FileTask {
        path: path.to_path_buf(),
        base_name,
        extension,
    })
}

/// Tasks sharing a base name write to the same artifact names; the last one wins.
fn warn_on_collisions(tasks: &[FileTask]) {
    let mut seen: HashMap<&str, &Path> = HashMap::new();
    for task in tasks {
        if let Some(previous) = seen.insert(task.base_name.as_str(), task.path.as_path()) {
            warn!(
                base_name = %task.base_name,
                first = %previous.display(),
                second = %task.path.display(),
                "Two inputs share a base name; their artifacts will overwrite each other"
            );
        }
    }
}
