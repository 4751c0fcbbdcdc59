//! Finds the contact-sheet folder under a root and pairs each video with
//! its sheet.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::context::LayoutConfig;
use crate::error::SortError;
use crate::workset::FilePair;

/// Strip Windows extended-length path prefix (`\\?\`) if present.
fn clean_path(p: PathBuf) -> PathBuf {
    match p.to_str().and_then(|s| s.strip_prefix(r"\\?\")) {
        Some(stripped) => PathBuf::from(stripped),
        None => p,
    }
}

fn folder_invalid(path: &Path, reason: impl ToString) -> SortError {
    SortError::FolderInvalid { path: path.to_path_buf(), reason: reason.to_string() }
}

/// Locate the single subfolder of `root` whose name starts with `prefix`.
pub fn find_marker_dir(root: &Path, prefix: &str) -> Result<PathBuf, SortError> {
    let entries = fs::read_dir(root).map_err(|e| folder_invalid(root, e))?;

    let mut candidates: Vec<PathBuf> = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir && entry.file_name().to_string_lossy().starts_with(prefix) {
            candidates.push(entry.path());
        }
    }

    match candidates.len() {
        0 => Err(SortError::NotFound(format!(
            "no folder starting with '{}' in {:?}",
            prefix, root
        ))),
        1 => Ok(candidates.remove(0)),
        _ => {
            candidates.sort();
            Err(SortError::NotFound(format!(
                "ambiguous: {} folders start with '{}' in {:?}: {:?}",
                candidates.len(),
                prefix,
                root,
                candidates
            )))
        }
    }
}

/// Absolute form of `root`, which must be an existing directory.
pub fn canonical_root(root: &Path) -> Result<PathBuf, SortError> {
    let meta = fs::metadata(root).map_err(|e| folder_invalid(root, e))?;
    if !meta.is_dir() {
        return Err(folder_invalid(root, "not a directory"));
    }
    Ok(clean_path(root.canonicalize().map_err(|e| folder_invalid(root, e))?))
}

/// Build the working set for `root`, in directory-listing order.
pub fn resolve(root: &Path, layout: &LayoutConfig) -> Result<Vec<FilePair>, SortError> {
    let root = canonical_root(root)?;

    let marker_dir = find_marker_dir(&root, &layout.marker_prefix)?;
    log::info!("Contact sheets folder: {:?}", marker_dir);

    let entries = fs::read_dir(&root).map_err(|e| folder_invalid(&root, e))?;
    let mut pairs = Vec::new();
    let mut unpaired = 0usize;

    for entry in entries.filter_map(|e| e.ok()) {
        // Follows symlinks: a linked video is still a video.
        if !entry.path().is_file() {
            continue;
        }

        let mut image_name: OsString = entry.file_name();
        image_name.push(&layout.image_suffix);
        let image_path = marker_dir.join(image_name);

        if image_path.is_file() {
            pairs.push(FilePair::new(entry.path(), image_path));
        } else {
            log::debug!("No contact sheet for {:?}", entry.path());
            unpaired += 1;
        }
    }

    log::info!("Found {} pairs in {:?} ({} files without a sheet)", pairs.len(), root, unpaired);
    Ok(pairs)
}
