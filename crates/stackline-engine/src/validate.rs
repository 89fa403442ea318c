use std::fs;
use std::path::PathBuf;

use stackline_domain::ValidatedTemplate;
use tracing::info;

use crate::cloud::{MAX_TEMPLATE_BODY, StackApi, TemplateSource};
use crate::discovery::discover_files;
use crate::error::ValidateError;
use crate::pool::{DEFAULT_WORKERS, TaskGroup};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Url(String),
    File(PathBuf),
}

impl Target {
    fn label(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::File(path) => path.display().to_string(),
        }
    }
}

fn is_url(target: &str) -> bool {
    target.starts_with("https://") || target.starts_with("http://")
}

fn expand_targets(targets: &[String], recursive: bool) -> Result<Vec<Target>, ValidateError> {
    let mut expanded = Vec::new();
    for target in targets {
        if is_url(target) {
            expanded.push(Target::Url(target.clone()));
            continue;
        }

        let path = PathBuf::from(target);
        if path.is_dir() {
            let files =
                discover_files(&path, recursive).map_err(|source| ValidateError::Walk { source })?;
            expanded.extend(files.into_iter().map(Target::File));
        } else {
            expanded.push(Target::File(path));
        }
    }
    Ok(expanded)
}

fn validate_target(stacks: &dyn StackApi, target: &Target) -> Result<ValidatedTemplate, ValidateError> {
    let source = match target {
        Target::Url(url) => TemplateSource::Url(url.clone()),
        Target::File(path) => {
            let body = fs::read_to_string(path).map_err(|source| ValidateError::Read {
                path: path.clone(),
                source,
            })?;
            if body.len() > MAX_TEMPLATE_BODY {
                return Err(ValidateError::TemplateTooLarge {
                    path: path.clone(),
                    size: body.len(),
                    limit: MAX_TEMPLATE_BODY,
                });
            }
            TemplateSource::Body(body)
        }
    };

    let label = target.label();
    let capabilities = stacks
        .validate_template(&source)
        .map_err(|source| ValidateError::Invalid {
            target: label.clone(),
            source,
        })?;
    info!(target = %label, "template is valid");
    Ok(ValidatedTemplate {
        target: label,
        capabilities,
    })
}

/// Validate template files, directories of templates, and template URLs.
///
/// # Errors
///
/// Returns the first invalid or unreadable template.
pub fn validate_templates(
    stacks: &dyn StackApi,
    targets: &[String],
    recursive: bool,
) -> Result<Vec<ValidatedTemplate>, ValidateError> {
    let expanded = expand_targets(targets, recursive)?;
    let group = TaskGroup::new(DEFAULT_WORKERS)?;
    let mut validated = group.run(expanded, |target| validate_target(stacks, &target))?;
    validated.sort_by(|left, right| left.target.cmp(&right.target));
    Ok(validated)
}
