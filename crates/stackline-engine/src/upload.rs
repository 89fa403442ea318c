use std::fs;
use std::path::Path;

use stackline_domain::UploadedObject;
use tracing::info;

use crate::cloud::ObjectStore;
use crate::discovery::discover_files;
use crate::error::UploadError;
use crate::pool::{DEFAULT_WORKERS, TaskGroup};

#[derive(Debug, Clone)]
pub struct UploadRequest<'a> {
    pub source: &'a Path,
    pub bucket: &'a str,
    pub prefix: &'a str,
    pub recursive: bool,
    /// File names skipped anywhere in the tree.
    pub exclude: &'a [String],
}

fn object_key(prefix: &str, relative: &Path) -> String {
    let relative = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        relative
    } else {
        format!("{prefix}/{relative}")
    }
}

fn is_excluded(path: &Path, exclude: &[String]) -> bool {
    path.file_name()
        .is_some_and(|name| exclude.iter().any(|excluded| name == excluded.as_str()))
}

/// Upload a file, or every file of a directory, to `request.bucket`.
///
/// Directory uploads keep the directory's own name in the key, so
/// `templates/nested/db.yaml` under prefix `v1` becomes
/// `v1/templates/nested/db.yaml`.
///
/// # Errors
///
/// Returns the first read or upload failure; remaining uploads are cancelled.
pub fn upload_path(
    objects: &dyn ObjectStore,
    request: &UploadRequest<'_>,
) -> Result<Vec<UploadedObject>, UploadError> {
    let source = request.source;
    if !source.exists() {
        return Err(UploadError::MissingSource {
            path: source.to_path_buf(),
        });
    }

    let (base, files) = if source.is_dir() {
        let files = discover_files(source, request.recursive)
            .map_err(|source| UploadError::Walk { source })?;
        (source.parent().unwrap_or(source), files)
    } else {
        (source.parent().unwrap_or(Path::new("")), vec![source.to_path_buf()])
    };

    let files = files
        .into_iter()
        .filter(|path| !is_excluded(path, request.exclude));

    let group = TaskGroup::new(DEFAULT_WORKERS)?;
    let mut uploaded = group.run(files, |path| {
        let body = fs::read(&path).map_err(|source| UploadError::Read {
            path: path.clone(),
            source,
        })?;
        let relative = path.strip_prefix(base).unwrap_or(&path);
        let key = object_key(request.prefix, relative);
        let location = objects
            .upload(request.bucket, &key, &body)
            .map_err(|source| UploadError::Upload {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), %location, "uploaded");
        Ok::<_, UploadError>(UploadedObject {
            path,
            key,
            location,
        })
    })?;

    uploaded.sort_by(|left, right| left.key.cmp(&right.key));
    Ok(uploaded)
}
