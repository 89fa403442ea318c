use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use stackline_domain::{
    DeployReport, LifecycleOutcome, MANAGED_BY_TAG, Manifest, OperationKind, RunMode,
    StackDeclaration, StackResult,
};
use tracing::{debug, info, warn};

use crate::cloud::{
    CloudClients, MAX_TEMPLATE_BODY, ObjectStore, StackRequest, TemplateSource,
    is_no_update_error,
};
use crate::error::{CloudError, DeployError, display_chain};
use crate::template::{Resolver, resolve};
use crate::values::{ValueContext, parse_key_values};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployMode {
    /// Create or update every selected stack.
    Apply,
    /// Resolve parameters and validate templates only.
    DryRun,
    /// Resolve parameters only; stacks without a fragment are skipped.
    ParamsOnly,
}

impl DeployMode {
    #[must_use]
    pub const fn run_mode(self) -> RunMode {
        match self {
            Self::Apply => RunMode::Deploy,
            Self::DryRun => RunMode::DryRun,
            Self::ParamsOnly => RunMode::ParamsOnly,
        }
    }
}

/// Stacks of `order` that are declared and selected, in order.
fn selected<'a>(
    order: &[String],
    manifest: &'a Manifest,
    active: &BTreeSet<String>,
) -> Vec<&'a StackDeclaration> {
    order
        .iter()
        .filter(|name| active.contains(name.as_str()))
        .filter_map(|name| manifest.stack(name))
        .collect()
}

fn push_fail_fast_abort_message(errors: &mut Vec<String>, failed_index: usize, total: usize) {
    let remaining = total.saturating_sub(failed_index + 1);
    errors.push(format!(
        "run aborted after first failure ({remaining} stack(s) not attempted)"
    ));
}

/// Drive every selected stack of `order` through its lifecycle, one at a
/// time, stopping at the first failure.
///
/// Vertices that are not declared in the manifest or not in `active` are
/// skipped. Returns the report and every value that must be redacted.
#[must_use]
pub fn deploy_stacks(
    order: &[String],
    manifest: &Manifest,
    active: &BTreeSet<String>,
    context: &ValueContext,
    resolver: &Resolver,
    mode: DeployMode,
) -> (DeployReport, BTreeSet<String>) {
    let mut report = DeployReport::new(manifest.path.to_path_buf(), mode.run_mode());

    let stacks = selected(order, manifest, active);
    report.order = stacks.iter().map(|stack| stack.name.to_string()).collect();

    for (index, stack) in stacks.iter().enumerate() {
        match deploy_stack(stack, manifest, context, resolver, mode) {
            Ok(Some(result)) => report.results.push(result),
            Ok(None) => debug!(stack = %stack.name, "no parameter fragment, skipping"),
            Err(error) => {
                let message = display_chain(&error);
                report
                    .errors
                    .push(format!("stack {} failed: {message}", stack.name));
                report
                    .results
                    .push(StackResult::failed(stack.name.as_str(), message));
                push_fail_fast_abort_message(&mut report.errors, index, stacks.len());
                break;
            }
        }
    }

    (report, context.sensitive_values().clone())
}

fn resolve_parameters(
    path: &Path,
    context: &ValueContext,
    resolver: &Resolver,
) -> Result<BTreeMap<String, String>, DeployError> {
    let fragment = fs::read_to_string(path).map_err(|source| DeployError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if fragment.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let evaluation =
        resolve(&fragment, context, resolver).map_err(|source| DeployError::Evaluate {
            path: path.to_path_buf(),
            source,
        })?;
    parse_key_values(&evaluation.rendered).map_err(|source| DeployError::Parameters {
        path: path.to_path_buf(),
        source,
    })
}

fn read_template(path: &Path) -> Result<TemplateSource, DeployError> {
    let body = fs::read_to_string(path).map_err(|source| DeployError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if body.len() > MAX_TEMPLATE_BODY {
        return Err(DeployError::TemplateTooLarge {
            path: path.to_path_buf(),
            size: body.len(),
            limit: MAX_TEMPLATE_BODY,
        });
    }
    Ok(TemplateSource::Body(body))
}

fn deploy_stack(
    stack: &StackDeclaration,
    manifest: &Manifest,
    context: &ValueContext,
    resolver: &Resolver,
    mode: DeployMode,
) -> Result<Option<StackResult>, DeployError> {
    let name = stack.name.as_str();
    let parameter_path = manifest.parameter_path(stack);
    if mode == DeployMode::ParamsOnly && parameter_path.is_none() {
        return Ok(None);
    }

    let parameters = match &parameter_path {
        Some(path) => resolve_parameters(path, context, resolver)?,
        None => BTreeMap::new(),
    };
    let finish = |outcome: LifecycleOutcome,
                  parameters: BTreeMap<String, String>,
                  status: Option<String>| {
        let mut result = StackResult::new(name, outcome);
        result.parameters = parameters;
        result.status = status;
        Some(result)
    };

    if mode == DeployMode::ParamsOnly {
        return Ok(finish(LifecycleOutcome::Resolved, parameters, None));
    }

    let template_path = manifest.template_path(stack);
    let template = read_template(&template_path)?;
    let stacks = &resolver.clients.stacks;
    let capabilities =
        stacks
            .validate_template(&template)
            .map_err(|source| DeployError::Validation {
                path: template_path.clone(),
                source,
            })?;

    if mode == DeployMode::DryRun {
        info!(stack = name, "template is valid");
        return Ok(finish(LifecycleOutcome::Validated, parameters, None));
    }

    let mut tags = stack.tags.clone();
    tags.insert(MANAGED_BY_TAG.0.to_string(), MANAGED_BY_TAG.1.to_string());
    let request = StackRequest {
        name: name.to_string(),
        template,
        parameters: parameters.clone(),
        tags,
        capabilities,
    };

    let exists = stacks.stack_exists(name)?;
    let kind = if exists {
        OperationKind::Update
    } else {
        OperationKind::Create
    };
    info!(stack = name, operation = %kind, "starting stack operation");

    let issued = if exists {
        stacks.update_stack(&request)
    } else {
        stacks.create_stack(&request)
    };
    if let Err(error) = issued {
        if is_no_update_error(&error) {
            info!(stack = name, "no updates are to be performed");
            return Ok(finish(LifecycleOutcome::NoUpdateNeeded, parameters, None));
        }
        return Err(error.into());
    }

    let status = stacks.wait_for_stack(name, kind)?;
    if !status.is_success(kind) {
        return Err(DeployError::OperationFailed {
            stack: name.to_string(),
            kind,
            status: status.0,
        });
    }
    info!(stack = name, %status, "stack operation finished");

    let outcome = if exists {
        LifecycleOutcome::Updated
    } else {
        LifecycleOutcome::Created
    };
    Ok(finish(outcome, parameters, Some(status.0)))
}

/// Delete every selected stack of `order`, consumers before producers.
///
/// Stacks that do not exist are reported as absent.
#[must_use]
pub fn delete_stacks(
    order: &[String],
    manifest: &Manifest,
    active: &BTreeSet<String>,
    clients: &CloudClients,
) -> DeployReport {
    let mut report = DeployReport::new(manifest.path.to_path_buf(), RunMode::Delete);
    let mut stacks = selected(order, manifest, active);
    stacks.reverse();
    report.order = stacks.iter().map(|stack| stack.name.to_string()).collect();

    for (index, stack) in stacks.iter().enumerate() {
        let name = stack.name.as_str();
        match delete_stack(name, clients) {
            Ok(result) => {
                if result.outcome == LifecycleOutcome::Absent {
                    warn!(stack = name, "stack does not exist, nothing to delete");
                    report.warnings.push(format!("stack {name} does not exist"));
                }
                report.results.push(result);
            }
            Err(error) => {
                let message = display_chain(&error);
                report.errors.push(format!("stack {name} failed: {message}"));
                report.results.push(StackResult::failed(name, message));
                push_fail_fast_abort_message(&mut report.errors, index, stacks.len());
                break;
            }
        }
    }

    report
}

fn delete_stack(name: &str, clients: &CloudClients) -> Result<StackResult, DeployError> {
    let stacks = &clients.stacks;
    if !stacks.stack_exists(name)? {
        return Ok(StackResult::new(name, LifecycleOutcome::Absent));
    }

    info!(stack = name, "deleting stack");
    stacks.delete_stack(name)?;
    let status = stacks.wait_for_stack(name, OperationKind::Delete)?;
    if !status.is_success(OperationKind::Delete) {
        return Err(DeployError::OperationFailed {
            stack: name.to_string(),
            kind: OperationKind::Delete,
            status: status.0,
        });
    }

    let mut result = StackResult::new(name, LifecycleOutcome::Deleted);
    result.status = Some(status.0);
    Ok(result)
}

/// Create `bucket` when it does not exist yet. Returns whether it was created.
///
/// # Errors
///
/// Returns the provider error when the bucket cannot be checked or created.
pub fn ensure_bucket(objects: &dyn ObjectStore, bucket: &str) -> Result<bool, CloudError> {
    if objects.bucket_exists(bucket)? {
        debug!(bucket, "bucket exists");
        return Ok(false);
    }
    warn!(bucket, "bucket does not exist, creating it");
    objects.create_bucket(bucket)?;
    Ok(true)
}
