use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Regular files under `root`, sorted by path.
///
/// Without `recursive` only the direct children of `root` are returned.
///
/// # Errors
///
/// Returns the first directory walk failure.
pub fn discover_files(root: &Path, recursive: bool) -> Result<Vec<PathBuf>, walkdir::Error> {
    let mut walker = WalkDir::new(root).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}
