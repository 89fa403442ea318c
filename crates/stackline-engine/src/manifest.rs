use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use stackline_domain::{AbsolutePath, Manifest, StackDeclaration, StackName};
use tracing::debug;

use crate::error::ManifestError;

/// Manifest file looked up when none is given.
pub const DEFAULT_MANIFEST: &str = "stacks.yaml";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestFile {
    #[serde(default)]
    s3_bucket: String,
    #[serde(default)]
    template_dir: PathBuf,
    #[serde(default)]
    env_dir: PathBuf,
    #[serde(default)]
    param_dir: PathBuf,
    #[serde(default)]
    stacks: Vec<StackEntry>,
}

#[derive(Debug, Deserialize)]
struct StackEntry {
    name: String,
    tpl: PathBuf,
    #[serde(default)]
    param: Option<PathBuf>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
}

fn render_manifest(path: &Path, raw: &str) -> Result<String, ManifestError> {
    let render_error = |source: tera::Error| ManifestError::Render {
        path: path.to_path_buf(),
        source,
    };

    let mut tera = tera::Tera::default();
    tera.add_raw_template("__manifest__", raw)
        .map_err(render_error)?;
    tera.register_function("env", |args: &HashMap<String, tera::Value>| {
        let name = args
            .get("name")
            .and_then(tera::Value::as_str)
            .ok_or_else(|| tera::Error::msg("env() requires a `name` string argument"))?;
        Ok(tera::Value::String(std::env::var(name).unwrap_or_default()))
    });
    tera.render("__manifest__", &tera::Context::new())
        .map_err(render_error)
}

fn resolve_dir(
    base: &Path,
    relative: &Path,
    field: &'static str,
) -> Result<AbsolutePath, ManifestError> {
    let path = base.join(relative);
    if !path.is_dir() {
        return Err(ManifestError::MissingDirectory { field, path });
    }
    Ok(AbsolutePath::new(path)?)
}

/// Load a manifest file.
///
/// The file is rendered first so `{{ env(name="...") }}` can inject values
/// from the process environment. Directories are resolved against the
/// manifest's own folder and must exist.
///
/// # Errors
///
/// Returns an error when the file cannot be read, rendered or parsed, when a
/// configured directory is missing, or when stacks are invalid or duplicated.
pub fn load_manifest(path: &Path) -> Result<Manifest, ManifestError> {
    let canonical = fs::canonicalize(path).map_err(|source| ManifestError::CanonicalizePath {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = fs::read_to_string(&canonical).map_err(|source| ManifestError::Read {
        path: canonical.clone(),
        source,
    })?;

    let rendered = render_manifest(&canonical, &raw)?;
    let file: ManifestFile =
        serde_yaml::from_str(&rendered).map_err(|source| ManifestError::Parse {
            path: canonical.clone(),
            source,
        })?;

    let Some(base) = canonical.parent() else {
        return Err(ManifestError::MissingParent { path: canonical });
    };

    let bucket = file.s3_bucket.trim().to_string();
    if bucket.is_empty() {
        return Err(ManifestError::MissingBucket);
    }

    let template_root = resolve_dir(base, &file.template_dir, "templateDir")?;
    let environment_root = resolve_dir(base, &file.env_dir, "envDir")?;
    let parameter_root = resolve_dir(base, &file.param_dir, "paramDir")?;

    let mut seen = BTreeSet::new();
    let mut stacks = Vec::with_capacity(file.stacks.len());
    for entry in file.stacks {
        if !seen.insert(entry.name.clone()) {
            return Err(ManifestError::DuplicateStack { name: entry.name });
        }
        let mut stack = StackDeclaration::new(StackName::new(entry.name)?, entry.tpl);
        stack.parameters = entry.param.filter(|param| !param.as_os_str().is_empty());
        stack.tags = entry.tags;
        stacks.push(stack);
    }

    debug!(
        manifest = %canonical.display(),
        stacks = stacks.len(),
        bucket = %bucket,
        "loaded manifest"
    );

    Ok(Manifest {
        path: AbsolutePath::new(canonical)?,
        bucket,
        template_root,
        parameter_root,
        environment_root,
        stacks,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::fs;
    use std::path::{Path, PathBuf};

    use super::load_manifest;
    use crate::error::ManifestError;

    fn layout(root: &Path) {
        for dir in ["templates", "parameters", "environments"] {
            fs::create_dir_all(root.join(dir)).expect("mkdir");
        }
    }

    const MANIFEST: &str = r"
s3Bucket: artifacts-{{ env(name='STACKLINE_TEST_UNSET_SUFFIX') }}bucket
templateDir: templates
paramDir: parameters
envDir: environments
stacks:
  - name: network
    tpl: vpc.yaml
    param: vpc.yaml
    tags:
      Group: core
  - name: app
    tpl: app.yaml
";

    #[test]
    fn loads_and_resolves_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        layout(temp.path());
        let path = temp.path().join("stacks.yaml");
        fs::write(&path, MANIFEST).expect("write");

        let manifest = load_manifest(&path).expect("load");
        let root = fs::canonicalize(temp.path()).expect("canonical");
        assert_eq!(manifest.bucket, "artifacts-bucket");
        assert_eq!(manifest.template_root.as_path(), root.join("templates"));
        assert_eq!(manifest.stacks.len(), 2);

        let network = &manifest.stacks[0];
        assert_eq!(network.name.as_str(), "network");
        assert_eq!(network.tags.get("Group").map(String::as_str), Some("core"));
        assert_eq!(
            manifest.parameter_path(network),
            Some(root.join("parameters/vpc.yaml"))
        );
        assert_eq!(manifest.stacks[1].parameters, None::<PathBuf>);
    }

    #[test]
    fn missing_directory_is_reported_by_field() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("templates")).expect("mkdir");
        fs::create_dir_all(temp.path().join("environments")).expect("mkdir");
        let path = temp.path().join("stacks.yaml");
        fs::write(&path, MANIFEST).expect("write");

        let error = load_manifest(&path).expect_err("must fail");
        assert!(matches!(
            error,
            ManifestError::MissingDirectory { field: "paramDir", .. }
        ));
    }

    #[test]
    fn duplicate_stack_names_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        layout(temp.path());
        let path = temp.path().join("stacks.yaml");
        fs::write(
            &path,
            "s3Bucket: b\ntemplateDir: templates\nparamDir: parameters\nenvDir: environments\n\
             stacks:\n  - {name: a, tpl: a.yaml}\n  - {name: a, tpl: b.yaml}\n",
        )
        .expect("write");

        let error = load_manifest(&path).expect_err("must fail");
        assert!(matches!(error, ManifestError::DuplicateStack { name } if name == "a"));
    }

    #[test]
    fn bucket_is_required() {
        let temp = tempfile::tempdir().expect("tempdir");
        layout(temp.path());
        let path = temp.path().join("stacks.yaml");
        fs::write(
            &path,
            "templateDir: templates\nparamDir: parameters\nenvDir: environments\n",
        )
        .expect("write");

        let error = load_manifest(&path).expect_err("must fail");
        assert!(matches!(error, ManifestError::MissingBucket));
    }

    #[test]
    fn missing_file_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let error = load_manifest(&temp.path().join("absent.yaml")).expect_err("must fail");
        assert!(matches!(error, ManifestError::CanonicalizePath { .. }));
    }
}
