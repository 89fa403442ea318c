use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag added to every stack created or updated by stackline.
pub const MANAGED_BY_TAG: (&str, &str) = ("ManagedBy", "stackline");

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainValidationError {
    #[error("path must be absolute: {path}")]
    PathMustBeAbsolute { path: PathBuf },
    #[error("stack name must not be empty")]
    EmptyStackName,
    #[error("invalid tag filter \"{filter}\": expected key=value")]
    InvalidTagFilter { filter: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct AbsolutePath(PathBuf);

impl AbsolutePath {
    /// Create an absolute path wrapper, rejecting relative paths.
    ///
    /// # Errors
    ///
    /// Returns an error when `path` is not absolute.
    pub fn new(path: PathBuf) -> Result<Self, DomainValidationError> {
        if path.is_absolute() {
            Ok(Self(path))
        } else {
            Err(DomainValidationError::PathMustBeAbsolute { path })
        }
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> PathBuf {
        self.0
    }
}

impl TryFrom<PathBuf> for AbsolutePath {
    type Error = DomainValidationError;

    fn try_from(value: PathBuf) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&Path> for AbsolutePath {
    type Error = DomainValidationError;

    fn try_from(value: &Path) -> Result<Self, Self::Error> {
        Self::new(value.to_path_buf())
    }
}

impl AsRef<Path> for AbsolutePath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl Deref for AbsolutePath {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        self.as_path()
    }
}

impl fmt::Display for AbsolutePath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(formatter)
    }
}

impl From<AbsolutePath> for PathBuf {
    fn from(value: AbsolutePath) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StackName(String);

impl StackName {
    /// Create a stack name wrapper, rejecting blank names.
    ///
    /// # Errors
    ///
    /// Returns an error when `name` is empty after trimming.
    pub fn new(name: String) -> Result<Self, DomainValidationError> {
        if name.trim().is_empty() {
            Err(DomainValidationError::EmptyStackName)
        } else {
            Ok(Self(name))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StackName {
    type Error = DomainValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for StackName {
    type Error = DomainValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.to_string())
    }
}

impl AsRef<str> for StackName {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Deref for StackName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl fmt::Display for StackName {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl From<StackName> for String {
    fn from(value: StackName) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDeclaration {
    pub name: StackName,
    /// Template path relative to the manifest template root.
    pub template: PathBuf,
    /// Parameter fragment path relative to the manifest parameter root.
    pub parameters: Option<PathBuf>,
    pub tags: BTreeMap<String, String>,
}

impl StackDeclaration {
    #[must_use]
    pub fn new(name: StackName, template: PathBuf) -> Self {
        Self {
            name,
            template,
            parameters: None,
            tags: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub path: AbsolutePath,
    pub bucket: String,
    pub template_root: AbsolutePath,
    pub parameter_root: AbsolutePath,
    pub environment_root: AbsolutePath,
    pub stacks: Vec<StackDeclaration>,
}

impl Manifest {
    #[must_use]
    pub fn stack(&self, name: &str) -> Option<&StackDeclaration> {
        self.stacks.iter().find(|stack| stack.name.as_str() == name)
    }

    #[must_use]
    pub fn template_path(&self, stack: &StackDeclaration) -> PathBuf {
        self.template_root.join(&stack.template)
    }

    #[must_use]
    pub fn parameter_path(&self, stack: &StackDeclaration) -> Option<PathBuf> {
        stack
            .parameters
            .as_ref()
            .map(|relative| self.parameter_root.join(relative))
    }

    #[must_use]
    pub fn environment_dir(&self, environment: &str) -> PathBuf {
        self.environment_root.join(environment)
    }

    /// Stacks matching `filter`, in declaration order.
    #[must_use]
    pub fn select(&self, filter: &StackFilter) -> Vec<&StackDeclaration> {
        self.stacks
            .iter()
            .filter(|stack| filter.matches(stack))
            .collect()
    }
}

/// Stack selection: any of the names, and all of the tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackFilter {
    pub names: BTreeSet<String>,
    pub tags: Vec<(String, String)>,
}

impl StackFilter {
    /// Parse comma separated name and `key=value` tag lists.
    ///
    /// # Errors
    ///
    /// Returns an error when a tag entry is not of the form `key=value`.
    pub fn parse(names: Option<&str>, tags: Option<&str>) -> Result<Self, DomainValidationError> {
        let names = names
            .into_iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        let mut parsed_tags = Vec::new();
        for entry in tags
            .into_iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
        {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(DomainValidationError::InvalidTagFilter {
                    filter: entry.to_string(),
                });
            };
            parsed_tags.push((key.to_string(), value.to_string()));
        }

        Ok(Self {
            names,
            tags: parsed_tags,
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.tags.is_empty()
    }

    #[must_use]
    pub fn matches(&self, stack: &StackDeclaration) -> bool {
        let name_matches = self.names.is_empty() || self.names.contains(stack.name.as_str());
        let tags_match = self
            .tags
            .iter()
            .all(|(key, value)| stack.tags.get(key).is_some_and(|tag| tag == value));
        name_matches && tags_match
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    #[must_use]
    pub const fn success_status(self) -> &'static str {
        match self {
            Self::Create => "CREATE_COMPLETE",
            Self::Update => "UPDATE_COMPLETE",
            Self::Delete => "DELETE_COMPLETE",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        };
        formatter.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOutcome {
    Resolved,
    Validated,
    Created,
    Updated,
    NoUpdateNeeded,
    Deleted,
    Absent,
    Failed,
}

impl LifecycleOutcome {
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed)
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::Validated => "validated",
            Self::Created => "created",
            Self::Updated => "updated",
            Self::NoUpdateNeeded => "no update needed",
            Self::Deleted => "deleted",
            Self::Absent => "absent",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackResult {
    pub stack: String,
    pub outcome: LifecycleOutcome,
    pub parameters: BTreeMap<String, String>,
    pub status: Option<String>,
    pub error: Option<String>,
}

impl StackResult {
    #[must_use]
    pub fn new(stack: &str, outcome: LifecycleOutcome) -> Self {
        Self {
            stack: stack.to_string(),
            outcome,
            parameters: BTreeMap::new(),
            status: None,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(stack: &str, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(stack, LifecycleOutcome::Failed)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Deploy,
    DryRun,
    ParamsOnly,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployReport {
    pub manifest: PathBuf,
    pub mode: RunMode,
    pub order: Vec<String>,
    pub results: Vec<StackResult>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl DeployReport {
    #[must_use]
    pub fn new(manifest: PathBuf, mode: RunMode) -> Self {
        Self {
            manifest,
            mode,
            order: Vec::new(),
            results: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.errors.is_empty() || self.results.iter().any(|result| result.outcome.is_failure())
    }
}

/// One object written by `upload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedObject {
    pub path: PathBuf,
    pub key: String,
    pub location: String,
}

/// A template accepted by the provider, with the capabilities it requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedTemplate {
    pub target: String,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultAction {
    Encrypt,
    Decrypt,
    Edit,
}

impl VaultAction {
    #[must_use]
    pub const fn past_tense(self) -> &'static str {
        match self {
            Self::Encrypt => "encrypted",
            Self::Decrypt => "decrypted",
            Self::Edit => "edited",
        }
    }
}

/// A stack output, addressable by key or by export name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutput {
    pub key: String,
    pub value: String,
    pub export_name: Option<String>,
}

/// One line of `stack list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSummary {
    pub name: String,
    pub status: String,
    pub reason: Option<String>,
}

/// Live description of a deployed stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackDetail {
    pub name: String,
    pub status: String,
    pub reason: Option<String>,
    pub description: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub outputs: Vec<StackOutput>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackResource {
    pub logical_id: String,
    pub physical_id: Option<String>,
    pub kind: String,
    pub status: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackResources {
    pub stack: String,
    pub resources: Vec<StackResource>,
}

/// Result of looking up manifest stacks on the provider. Declared stacks
/// that are not deployed end up in `missing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackLookup<T> {
    pub found: Vec<T>,
    pub missing: Vec<String>,
}

impl<T> Default for StackLookup<T> {
    fn default() -> Self {
        Self {
            found: Vec::new(),
            missing: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::{AbsolutePath, DomainValidationError, StackDeclaration, StackFilter, StackName};

    fn declaration(name: &str, tags: &[(&str, &str)]) -> StackDeclaration {
        let mut stack = StackDeclaration::new(
            StackName::try_from(name).expect("valid name"),
            PathBuf::from("template.yaml"),
        );
        stack.tags = tags
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect::<BTreeMap<_, _>>();
        stack
    }

    #[test]
    fn absolute_path_rejects_relative_values() {
        let error = AbsolutePath::try_from(PathBuf::from("relative/path"))
            .expect_err("relative paths must be rejected");
        assert!(matches!(
            error,
            DomainValidationError::PathMustBeAbsolute { .. }
        ));
    }

    #[test]
    fn stack_name_rejects_blank_values() {
        let error = StackName::try_from("   ").expect_err("blank names must be rejected");
        assert!(matches!(error, DomainValidationError::EmptyStackName));
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = StackFilter::parse(None, None).expect("parse");
        assert!(filter.is_empty());
        assert!(filter.matches(&declaration("network", &[])));
    }

    #[test]
    fn filter_requires_all_tags() {
        let filter = StackFilter::parse(None, Some("Group=web,Env=prod")).expect("parse");
        assert!(filter.matches(&declaration(
            "frontend",
            &[("Group", "web"), ("Env", "prod"), ("Owner", "ops")]
        )));
        assert!(!filter.matches(&declaration("backend", &[("Group", "web")])));
    }

    #[test]
    fn filter_combines_names_and_tags() {
        let filter = StackFilter::parse(Some("a, b"), Some("Group=web")).expect("parse");
        assert!(filter.matches(&declaration("a", &[("Group", "web")])));
        assert!(!filter.matches(&declaration("b", &[("Group", "db")])));
        assert!(!filter.matches(&declaration("c", &[("Group", "web")])));
    }

    #[test]
    fn filter_rejects_malformed_tag() {
        let error = StackFilter::parse(None, Some("Group")).expect_err("must fail");
        assert!(matches!(
            error,
            DomainValidationError::InvalidTagFilter { .. }
        ));
    }
}
