use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use stackline_domain::Manifest;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{KeyValueError, ValueError};
use crate::pool::{DEFAULT_WORKERS, TaskGroup};
use crate::vault;

/// Environment folder that is always loaded first.
pub const DEFAULT_ENVIRONMENT: &str = "default";

/// Variables available to parameter templates.
///
/// Later merges override earlier ones. Values that came from vault encrypted
/// files are remembered so they can be redacted from operator output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueContext {
    values: BTreeMap<String, String>,
    sensitive: BTreeSet<String>,
}

impl ValueContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn merge(&mut self, other: Self) {
        self.values.extend(other.values);
        self.sensitive.extend(other.sensitive);
    }

    #[must_use]
    pub const fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    #[must_use]
    pub const fn sensitive_values(&self) -> &BTreeSet<String> {
        &self.sensitive
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ValueContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut context = Self::new();
        for (key, value) in iter {
            context.insert(key, value);
        }
        context
    }
}

#[derive(Debug)]
struct LoadedFragment {
    path: PathBuf,
    values: BTreeMap<String, String>,
    encrypted: bool,
}

/// Load and merge every value file under `root`.
///
/// Files are processed concurrently; the merge always follows the lexical
/// order of their full paths. A missing `root` yields an empty context.
///
/// # Errors
///
/// Returns the first read, decryption or parse failure, or a directory walk
/// failure. No partial context is returned.
pub fn load_values(root: &Path, passwords: &[String]) -> Result<ValueContext, ValueError> {
    if !root.exists() {
        debug!(root = %root.display(), "value directory absent, skipping");
        return Ok(ValueContext::new());
    }
    if !root.is_dir() {
        return Err(ValueError::RootIsNotDirectory {
            root: root.to_path_buf(),
        });
    }

    let files = WalkDir::new(root)
        .into_iter()
        .filter(|entry| entry.as_ref().map_or(true, |entry| entry.file_type().is_file()));

    let group = TaskGroup::new(DEFAULT_WORKERS)?;
    let mut fragments = group.run(files, |entry| {
        let entry = entry.map_err(|source| ValueError::Walk { source })?;
        load_fragment(entry.path(), passwords)
    })?;
    fragments.sort_by(|left, right| left.path.as_os_str().cmp(right.path.as_os_str()));

    let mut context = ValueContext::new();
    for fragment in fragments {
        debug!(
            path = %fragment.path.display(),
            keys = fragment.values.len(),
            encrypted = fragment.encrypted,
            "merging value file"
        );
        if fragment.encrypted {
            context
                .sensitive
                .extend(fragment.values.values().cloned());
        }
        context.values.extend(fragment.values);
    }

    Ok(context)
}

fn load_fragment(path: &Path, passwords: &[String]) -> Result<LoadedFragment, ValueError> {
    let raw = fs::read(path).map_err(|source| ValueError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;

    let encrypted = vault::has_header(&raw);
    let plaintext = if encrypted {
        decrypt_with_any(path, &raw, passwords)?
    } else {
        raw
    };

    let values = parse_key_values(&plaintext).map_err(|source| ValueError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(LoadedFragment {
        path: path.to_path_buf(),
        values,
        encrypted,
    })
}

fn decrypt_with_any(path: &Path, raw: &[u8], passwords: &[String]) -> Result<Vec<u8>, ValueError> {
    let mut last_error = None;
    for password in passwords {
        match vault::decrypt(password, raw) {
            Ok(plaintext) => return Ok(plaintext),
            Err(error) => last_error = Some(error),
        }
    }

    match last_error {
        Some(source) => Err(ValueError::Decrypt {
            path: path.to_path_buf(),
            attempts: passwords.len(),
            source,
        }),
        None => Err(ValueError::NoPasswords {
            path: path.to_path_buf(),
        }),
    }
}

/// Parse a YAML mapping into string key/value pairs.
///
/// Scalars are stringified and `null` becomes an empty string; an empty
/// document is an empty mapping.
///
/// # Errors
///
/// Returns an error for invalid YAML, non-mapping documents, or nested values.
pub fn parse_key_values(bytes: &[u8]) -> Result<BTreeMap<String, String>, KeyValueError> {
    let document: serde_yaml::Value =
        serde_yaml::from_slice(bytes).map_err(|source| KeyValueError::Yaml { source })?;

    let mapping = match document {
        serde_yaml::Value::Null => return Ok(BTreeMap::new()),
        serde_yaml::Value::Mapping(mapping) => mapping,
        _ => return Err(KeyValueError::NotAMapping),
    };

    let mut values = BTreeMap::new();
    for (key, value) in mapping {
        let Some(key) = scalar_to_string(&key) else {
            return Err(KeyValueError::NonStringKey {
                key: format!("{key:?}"),
            });
        };
        let Some(value) = scalar_to_string(&value) else {
            return Err(KeyValueError::NonScalarValue { key });
        };
        values.insert(key, value);
    }
    Ok(values)
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => Some(String::new()),
        serde_yaml::Value::Bool(flag) => Some(flag.to_string()),
        serde_yaml::Value::Number(number) => Some(number.to_string()),
        serde_yaml::Value::String(text) => Some(text.clone()),
        serde_yaml::Value::Tagged(tagged) => scalar_to_string(&tagged.value),
        serde_yaml::Value::Sequence(_) | serde_yaml::Value::Mapping(_) => None,
    }
}

/// Parse comma separated `name=value` overrides.
///
/// # Errors
///
/// Returns an error for an entry without `=` or with an empty name.
pub fn parse_overrides(input: &str) -> Result<Vec<(String, String)>, ValueError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((name, value)) if !name.trim().is_empty() => {
                Ok((name.trim().to_string(), value.to_string()))
            }
            _ => Err(ValueError::InvalidOverride {
                entry: entry.to_string(),
            }),
        })
        .collect()
}

/// Build the run context: `default` values, then the named environment, then
/// explicit overrides.
///
/// # Errors
///
/// Returns an error when either value directory fails to load.
pub fn load_layered_context(
    manifest: &Manifest,
    environment: Option<&str>,
    overrides: &[(String, String)],
    passwords: &[String],
) -> Result<ValueContext, ValueError> {
    let mut context = load_values(&manifest.environment_dir(DEFAULT_ENVIRONMENT), passwords)?;

    if let Some(environment) = environment.filter(|name| !name.is_empty()) {
        let layer = load_values(&manifest.environment_dir(environment), passwords)?;
        debug!(environment, keys = layer.len(), "loaded environment values");
        context.merge(layer);
    }

    for (name, value) in overrides {
        context.insert(name.clone(), value.clone());
    }

    Ok(context)
}
