use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use stackline_domain::{DeployReport, Manifest, StackFilter};
use tracing::{info, warn};

use crate::cloud::CloudClients;
use crate::deploy::{DeployMode, delete_stacks, deploy_stacks, ensure_bucket};
use crate::error::PipelineError;
use crate::graph::deployment_order;
use crate::manifest::load_manifest;
use crate::template::{Resolver, resolve};
use crate::values::load_layered_context;

#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub manifest: PathBuf,
    pub environment: Option<String>,
    pub filter: StackFilter,
    pub overrides: Vec<(String, String)>,
    pub passwords: Vec<String>,
    pub mode: DeployMode,
}

#[derive(Debug, Clone)]
pub struct DeleteRequest {
    pub manifest: PathBuf,
    pub filter: StackFilter,
    /// Delete every declared stack when the filter is empty.
    pub all: bool,
    pub passwords: Vec<String>,
}

/// A single file rendered against the manifest's values.
#[derive(Debug, Clone)]
pub struct TemplateRequest {
    pub manifest: PathBuf,
    pub path: PathBuf,
    pub environment: Option<String>,
    pub overrides: Vec<(String, String)>,
    pub passwords: Vec<String>,
}

fn active_stacks(manifest: &Manifest, filter: &StackFilter) -> BTreeSet<String> {
    manifest
        .select(filter)
        .into_iter()
        .map(|stack| stack.name.to_string())
        .collect()
}

/// Load the manifest and values, order the stacks, and drive the selected
/// stacks through their lifecycle.
///
/// A dependency cycle is reported before any provider call is made.
///
/// # Errors
///
/// Returns an error when the manifest, the values or the dependency graph
/// cannot be built, or when the artifact bucket cannot be ensured. Per-stack
/// failures are recorded in the report instead.
pub fn deploy_from_manifest(
    request: &DeployRequest,
    clients: &CloudClients,
) -> Result<(DeployReport, BTreeSet<String>), PipelineError> {
    let manifest = load_manifest(&request.manifest)?;
    let active = active_stacks(&manifest, &request.filter);

    let context = load_layered_context(
        &manifest,
        request.environment.as_deref(),
        &request.overrides,
        &request.passwords,
    )?;
    let order = deployment_order(&manifest, &context)?;
    info!(order = ?order, "computed deployment order");

    if request.mode != DeployMode::ParamsOnly
        && ensure_bucket(clients.objects.as_ref(), &manifest.bucket)?
    {
        info!(bucket = %manifest.bucket, "created artifact bucket");
    }

    let resolver = Resolver {
        clients: clients.clone(),
        template_root: manifest.template_root.to_path_buf(),
        bucket: manifest.bucket.clone(),
    };
    let (mut report, sensitive) =
        deploy_stacks(&order, &manifest, &active, &context, &resolver, request.mode);
    if active.is_empty() {
        warn!("no stacks match the selection");
        report.warnings.push("no stacks match the selection".to_string());
    }
    Ok((report, sensitive))
}

/// Delete the selected stacks, consumers before producers.
///
/// # Errors
///
/// Returns an error when neither a selection nor `all` is given, or when the
/// manifest, the values or the dependency graph cannot be built.
pub fn delete_from_manifest(
    request: &DeleteRequest,
    clients: &CloudClients,
) -> Result<DeployReport, PipelineError> {
    if request.filter.is_empty() && !request.all {
        return Err(PipelineError::EmptyDeleteSelection);
    }

    let manifest = load_manifest(&request.manifest)?;
    let active = active_stacks(&manifest, &request.filter);
    let context = load_layered_context(&manifest, None, &[], &request.passwords)?;
    let order = deployment_order(&manifest, &context)?;

    let mut report = delete_stacks(&order, &manifest, &active, clients);
    if active.is_empty() {
        warn!("no stacks match the selection");
        report.warnings.push("no stacks match the selection".to_string());
    }
    Ok(report)
}

/// Render `request.path` with every template function resolved for real,
/// returning the text and the values that must be redacted.
///
/// The artifact bucket is not created; `template_url` uploads assume it
/// exists.
///
/// # Errors
///
/// Returns an error when the manifest or values cannot be loaded, or when
/// the file cannot be read or rendered.
pub fn render_template_file(
    request: &TemplateRequest,
    clients: &CloudClients,
) -> Result<(String, BTreeSet<String>), PipelineError> {
    let manifest = load_manifest(&request.manifest)?;
    let context = load_layered_context(
        &manifest,
        request.environment.as_deref(),
        &request.overrides,
        &request.passwords,
    )?;

    let fragment = fs::read_to_string(&request.path).map_err(|source| PipelineError::Read {
        path: request.path.clone(),
        source,
    })?;
    let resolver = Resolver {
        clients: clients.clone(),
        template_root: manifest.template_root.to_path_buf(),
        bucket: manifest.bucket.clone(),
    };
    let evaluation =
        resolve(&fragment, &context, &resolver).map_err(|source| PipelineError::Render {
            path: request.path.clone(),
            source,
        })?;
    info!(path = %request.path.display(), "rendered template");

    let rendered = String::from_utf8_lossy(&evaluation.rendered).into_owned();
    Ok((rendered, context.sensitive_values().clone()))
}
