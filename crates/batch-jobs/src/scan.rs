//! Folder discovery

use artifact_cache::SourceFormat;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Recursively collect supported image files under `root`, sorted by path.
///
/// Symlinks are followed; a link back into an ancestor is reported and not
/// descended into, so each file is listed once. Hidden entries (names
/// starting with `.`) and `.xmp` sidecars are skipped. Unreadable subfolders
/// are logged and skipped; only a missing or unreadable `root` is an error.
pub fn discover_images(root: &Path) -> io::Result<Vec<PathBuf>> {
    if !fs::metadata(root)?.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a folder", root.display()),
        ));
    }

    let mut paths = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

    for entry in walker {
        match entry {
            Ok(entry) => {
                if entry.file_type().is_file() && SourceFormat::is_supported(entry.path()) {
                    paths.push(entry.into_path());
                }
            }
            Err(e) => tracing::warn!("Skipping during scan of {:?}: {}", root, e),
        }
    }

    paths.sort();
    tracing::debug!("Discovered {} images under {:?}", paths.len(), root);
    Ok(paths)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}
