use std::fmt::Write;
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use console::Style;
use serde::Serialize;
use stackline_domain::{
    DeployReport, LifecycleOutcome, RunMode, StackDetail, StackLookup, StackResources,
    StackResult, StackSummary, UploadedObject, ValidatedTemplate, VaultAction,
};

mod error;
mod options;
mod redaction;

pub use error::ReportError;
pub use options::{ColorChoice, OutputFormat, RenderOptions};
pub use redaction::{REDACTED, redact_sensitive};

/// Render a deploy, dry-run, parameter-only or delete report.
///
/// Parameter-only reports print each stack's resolved parameters: YAML in
/// text mode, `ParameterKey`/`ParameterValue` pairs in JSON mode.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn render_deploy(
    report: &DeployReport,
    format: OutputFormat,
    options: &RenderOptions,
) -> Result<String, ReportError> {
    match (format, report.mode) {
        (OutputFormat::Json, RunMode::ParamsOnly) => to_json(&parameter_sets(report)),
        (OutputFormat::Json, _) => to_json(report),
        (OutputFormat::Text, RunMode::ParamsOnly) => render_parameters_text(report, options),
        (OutputFormat::Text, _) => Ok(render_deploy_text(report, options)),
    }
}

/// Render the objects written by an upload.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_uploads(
    uploaded: &[UploadedObject],
    format: OutputFormat,
    options: &RenderOptions,
) -> Result<String, ReportError> {
    if format == OutputFormat::Json {
        return to_json(uploaded);
    }

    let style = TextStyle::new(options.color);
    let mut output = String::new();
    append_header(&mut output, "upload", None, &style);
    for object in uploaded {
        let _ = writeln!(
            output,
            "  {} {}{} {}",
            style.add_symbol("+"),
            TextStyle::pad_label(&style.add_label("uploaded")),
            style.dim(&object.path.display().to_string()),
            style.primary_text(&object.location),
        );
    }
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "{} {}",
        style.tally_label("Uploaded:"),
        count(uploaded.len(), "object", "objects")
    );
    Ok(output)
}

/// Render validated templates and the capabilities they require.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_validated(
    validated: &[ValidatedTemplate],
    format: OutputFormat,
    options: &RenderOptions,
) -> Result<String, ReportError> {
    if format == OutputFormat::Json {
        return to_json(validated);
    }

    let style = TextStyle::new(options.color);
    let mut output = String::new();
    append_header(&mut output, "validate", None, &style);
    for template in validated {
        let capabilities = if template.capabilities.is_empty() {
            String::new()
        } else {
            format!(" {}", style.dim(&template.capabilities.join(", ")))
        };
        let _ = writeln!(
            output,
            "  {} {}{}{capabilities}",
            style.add_symbol("+"),
            TextStyle::pad_label(&style.add_label("valid")),
            style.primary_text(&template.target),
        );
    }
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "{} {}",
        style.tally_label("Validated:"),
        count(validated.len(), "template", "templates")
    );
    Ok(output)
}

/// Render the files processed by a vault batch.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_vault(
    action: VaultAction,
    files: &[PathBuf],
    format: OutputFormat,
    options: &RenderOptions,
) -> Result<String, ReportError> {
    #[derive(Serialize)]
    struct VaultBatch<'a> {
        action: VaultAction,
        files: &'a [PathBuf],
    }

    if format == OutputFormat::Json {
        return to_json(&VaultBatch { action, files });
    }

    let style = TextStyle::new(options.color);
    let mut output = String::new();
    append_header(&mut output, "vault", None, &style);
    for file in files {
        let _ = writeln!(
            output,
            "  {} {}{}",
            style.change_symbol("~"),
            TextStyle::pad_label(&style.change_label(action.past_tense())),
            style.primary_text(&file.display().to_string()),
        );
    }
    Ok(output)
}

/// Render the stacks of an account.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_stack_list(
    summaries: &[StackSummary],
    format: OutputFormat,
    options: &RenderOptions,
) -> Result<String, ReportError> {
    if format == OutputFormat::Json {
        return to_json(summaries);
    }

    let style = TextStyle::new(options.color);
    let mut output = String::new();
    append_header(&mut output, "stacks", None, &style);
    let width = summaries
        .iter()
        .map(|summary| summary.name.len())
        .max()
        .unwrap_or_default();
    for summary in summaries {
        let _ = write!(
            output,
            "  {}  {}",
            style.primary_text(&format!("{:width$}", summary.name)),
            style.status(&summary.status),
        );
        if let Some(reason) = &summary.reason {
            let _ = write!(output, " {}", style.dim(reason));
        }
        let _ = writeln!(output);
    }
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "{} {}",
        style.tally_label("Listed:"),
        count(summaries.len(), "stack", "stacks")
    );
    Ok(output)
}

/// Render the live details of manifest stacks.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_stack_details(
    lookup: &StackLookup<StackDetail>,
    format: OutputFormat,
    options: &RenderOptions,
) -> Result<String, ReportError> {
    if format == OutputFormat::Json {
        return to_json(lookup);
    }

    let style = TextStyle::new(options.color);
    let mut output = String::new();
    for detail in &lookup.found {
        append_header(&mut output, "stack", Some(&detail.name), &style);
        let _ = writeln!(output, "  status       {}", style.status(&detail.status));
        if let Some(reason) = &detail.reason {
            let _ = writeln!(output, "  reason       {}", style.dim(reason));
        }
        if let Some(description) = &detail.description {
            let _ = writeln!(output, "  description  {description}");
        }
        append_pairs(&mut output, "parameters", &detail.parameters, &style);
        if !detail.outputs.is_empty() {
            let _ = writeln!(output, "  outputs");
            for stack_output in &detail.outputs {
                let export = stack_output
                    .export_name
                    .as_deref()
                    .map_or_else(String::new, |name| {
                        format!(" {}", style.dim(&format!("(export {name})")))
                    });
                let _ = writeln!(
                    output,
                    "    {} = {}{export}",
                    stack_output.key,
                    style.primary_text(&stack_output.value)
                );
            }
        }
        append_pairs(&mut output, "tags", &detail.tags, &style);
        let _ = writeln!(output);
    }
    append_missing(&mut output, &lookup.missing, &style);
    Ok(output)
}

/// Render the resources of manifest stacks.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_stack_resources(
    lookup: &StackLookup<StackResources>,
    format: OutputFormat,
    options: &RenderOptions,
) -> Result<String, ReportError> {
    if format == OutputFormat::Json {
        return to_json(lookup);
    }

    let style = TextStyle::new(options.color);
    let mut output = String::new();
    for stack in &lookup.found {
        append_header(&mut output, "resources", Some(&stack.stack), &style);
        if stack.resources.is_empty() {
            let _ = writeln!(output, "  No resources.");
        }
        for resource in &stack.resources {
            let physical = resource.physical_id.as_deref().unwrap_or("-");
            let _ = write!(
                output,
                "  {} {} {} {}",
                style.primary_text(&resource.logical_id),
                style.dim(&resource.kind),
                physical,
                style.status(&resource.status),
            );
            if let Some(reason) = &resource.reason {
                let _ = write!(output, " {}", style.dim(reason));
            }
            let _ = writeln!(output);
        }
        let _ = writeln!(output);
    }
    append_missing(&mut output, &lookup.missing, &style);
    Ok(output)
}

fn append_pairs(
    output: &mut String,
    title: &str,
    pairs: &std::collections::BTreeMap<String, String>,
    style: &TextStyle,
) {
    if pairs.is_empty() {
        return;
    }
    let _ = writeln!(output, "  {title}");
    for (key, value) in pairs {
        let _ = writeln!(output, "    {key} = {}", style.primary_text(value));
    }
}

fn append_missing(output: &mut String, missing: &[String], style: &TextStyle) {
    for name in missing {
        let _ = writeln!(
            output,
            "  {} stack {name} is not deployed",
            style.warn_prefix("warn:")
        );
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, ReportError> {
    serde_json::to_string_pretty(value).map_err(|source| ReportError::JsonSerialize { source })
}

fn count(total: usize, singular: &str, plural: &str) -> String {
    format!("{total} {}", if total == 1 { singular } else { plural })
}

const fn command_label(mode: RunMode) -> &'static str {
    match mode {
        RunMode::Deploy => "deploy",
        RunMode::DryRun => "dry-run",
        RunMode::ParamsOnly => "params",
        RunMode::Delete => "delete",
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Parameter<'a> {
    parameter_key: &'a str,
    parameter_value: &'a str,
}

#[derive(Serialize)]
struct ParameterSet<'a> {
    stack: &'a str,
    parameters: Vec<Parameter<'a>>,
}

fn resolved(report: &DeployReport) -> impl Iterator<Item = &StackResult> {
    report
        .results
        .iter()
        .filter(|result| result.outcome == LifecycleOutcome::Resolved)
}

fn parameter_sets(report: &DeployReport) -> Vec<ParameterSet<'_>> {
    resolved(report)
        .map(|result| ParameterSet {
            stack: &result.stack,
            parameters: result
                .parameters
                .iter()
                .map(|(key, value)| Parameter {
                    parameter_key: key,
                    parameter_value: value,
                })
                .collect(),
        })
        .collect()
}

fn render_parameters_text(
    report: &DeployReport,
    options: &RenderOptions,
) -> Result<String, ReportError> {
    let style = TextStyle::new(options.color);
    let mut output = String::new();
    for result in resolved(report) {
        let yaml = serde_yaml::to_string(&result.parameters).map_err(|source| {
            ReportError::YamlSerialize {
                stack: result.stack.clone(),
                source,
            }
        })?;
        let _ = writeln!(output, "{}", style.dim(&format!("# {}", result.stack)));
        output.push_str(&yaml);
    }
    append_warnings_and_errors(&mut output, &report.warnings, &report.errors, &style);
    Ok(output)
}

// ---------------------------------------------------------------------------
// Lifecycle text
// ---------------------------------------------------------------------------

fn render_deploy_text(report: &DeployReport, options: &RenderOptions) -> String {
    let mut output = String::new();
    let style = TextStyle::new(options.color);
    let manifest = report.manifest.display().to_string();

    append_header(
        &mut output,
        command_label(report.mode),
        Some(&manifest),
        &style,
    );

    if report.results.is_empty() {
        let _ = writeln!(output, "  Nothing to do.");
        append_warnings_and_errors(&mut output, &report.warnings, &report.errors, &style);
        return output;
    }

    append_warnings_and_errors(&mut output, &report.warnings, &report.errors, &style);
    let _ = writeln!(output);
    for result in &report.results {
        append_result_line(&mut output, result, options, &style);
    }

    let _ = writeln!(output);
    let tally = Tally::from_results(&report.results);
    let _ = writeln!(output, "{}", tally.format(report.mode, &style));
    output
}

fn append_header(output: &mut String, command: &str, target: Option<&str>, style: &TextStyle) {
    let _ = write!(output, "{}", style.header_command(command));
    if let Some(target) = target {
        let _ = write!(output, " {}", style.header_target(target));
    }
    let _ = writeln!(output);
}

fn append_result_line(
    output: &mut String,
    result: &StackResult,
    options: &RenderOptions,
    style: &TextStyle,
) {
    let (symbol, label) = outcome_symbol_and_label(result.outcome, style);
    let status = result
        .status
        .as_deref()
        .map_or_else(String::new, |status| format!(" {}", style.dim(status)));
    let _ = writeln!(
        output,
        "  {symbol} {label}{}{status}",
        style.primary_text(&result.stack)
    );

    if let Some(error) = &result.error {
        let _ = writeln!(output, "      {}", style.error_detail(error));
    }

    if options.verbose {
        for (key, value) in &result.parameters {
            let _ = writeln!(output, "      {}", style.dim(&format!("{key} = {value}")));
        }
    }
}

fn outcome_symbol_and_label(outcome: LifecycleOutcome, style: &TextStyle) -> (String, String) {
    let label = outcome.label();
    match outcome {
        LifecycleOutcome::Created => (
            style.add_symbol("+"),
            TextStyle::pad_label(&style.add_label(label)),
        ),
        LifecycleOutcome::Updated => (
            style.change_symbol("~"),
            TextStyle::pad_label(&style.change_label(label)),
        ),
        LifecycleOutcome::Resolved | LifecycleOutcome::Validated => (
            style.change_symbol("*"),
            TextStyle::pad_label(&style.change_label(label)),
        ),
        LifecycleOutcome::Deleted => (
            style.delete_symbol("-"),
            TextStyle::pad_label(&style.delete_label(label)),
        ),
        LifecycleOutcome::NoUpdateNeeded | LifecycleOutcome::Absent => (
            style.noop_symbol("="),
            TextStyle::pad_label(&style.noop_label(label)),
        ),
        LifecycleOutcome::Failed => (
            style.error_op_symbol("!"),
            TextStyle::pad_label(&style.error_op_label(label)),
        ),
    }
}

fn append_warnings_and_errors(
    output: &mut String,
    warnings: &[String],
    errors: &[String],
    style: &TextStyle,
) {
    if warnings.is_empty() && errors.is_empty() {
        return;
    }
    let _ = writeln!(output);
    for warning in warnings {
        let _ = writeln!(output, "  {} {warning}", style.warn_prefix("warn:"));
    }
    for error in errors {
        let _ = writeln!(output, "  {} {error}", style.error_prefix("error:"));
    }
}

// ---------------------------------------------------------------------------
// Tally
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tally {
    created: usize,
    updated: usize,
    validated: usize,
    unchanged: usize,
    deleted: usize,
    absent: usize,
    failed: usize,
}

impl Tally {
    fn from_results(results: &[StackResult]) -> Self {
        let mut tally = Self::default();
        for result in results {
            match result.outcome {
                LifecycleOutcome::Created => tally.created += 1,
                LifecycleOutcome::Updated => tally.updated += 1,
                LifecycleOutcome::Resolved | LifecycleOutcome::Validated => tally.validated += 1,
                LifecycleOutcome::NoUpdateNeeded => tally.unchanged += 1,
                LifecycleOutcome::Deleted => tally.deleted += 1,
                LifecycleOutcome::Absent => tally.absent += 1,
                LifecycleOutcome::Failed => tally.failed += 1,
            }
        }
        tally
    }

    fn format(&self, mode: RunMode, style: &TextStyle) -> String {
        let mut parts = Vec::new();
        if self.created > 0 {
            parts.push(style.add_label(&format!("{} created", self.created)));
        }
        if self.updated > 0 {
            parts.push(style.change_label(&format!("{} updated", self.updated)));
        }
        if self.validated > 0 {
            parts.push(style.change_label(&format!("{} validated", self.validated)));
        }
        if self.deleted > 0 {
            parts.push(style.delete_label(&format!("{} deleted", self.deleted)));
        }
        if self.failed > 0 {
            parts.push(style.error_op_label(&format!("{} failed", self.failed)));
        }
        if self.unchanged > 0 {
            parts.push(style.dim(&format!("{} unchanged", self.unchanged)));
        }
        if self.absent > 0 {
            parts.push(style.dim(&format!("{} absent", self.absent)));
        }

        let label = match mode {
            RunMode::Delete => "Deleted:",
            RunMode::DryRun | RunMode::ParamsOnly => "Checked:",
            RunMode::Deploy => "Deployed:",
        };
        if parts.is_empty() {
            format!("{} nothing to do", style.tally_label(label))
        } else {
            format!("{} {}", style.tally_label(label), parts.join(", "))
        }
    }
}

// ---------------------------------------------------------------------------
// TextStyle
// ---------------------------------------------------------------------------

const LABEL_WIDTH: usize = 18;

#[derive(Debug, Clone)]
struct TextStyle {
    color_enabled: bool,
    add: Style,
    change: Style,
    delete: Style,
    error: Style,
    noop: Style,
    primary: Style,
    dim: Style,
    header_command: Style,
    warn_prefix: Style,
    error_prefix: Style,
    tally_label: Style,
}

impl TextStyle {
    fn new(choice: ColorChoice) -> Self {
        Self {
            color_enabled: should_color(choice),
            add: Style::new().green(),
            change: Style::new().cyan(),
            delete: Style::new().magenta(),
            error: Style::new().red(),
            noop: Style::new().dim(),
            primary: Style::new().white(),
            dim: Style::new().dim(),
            header_command: Style::new().white().bold(),
            warn_prefix: Style::new().yellow().bold(),
            error_prefix: Style::new().red().bold(),
            tally_label: Style::new().white().bold(),
        }
    }

    fn paint<T: std::fmt::Display>(&self, style: &Style, text: T) -> String {
        if self.color_enabled {
            style.apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn pad_label(painted: &str) -> String {
        let visible_len = console::measure_text_width(painted);
        if visible_len < LABEL_WIDTH {
            format!("{painted}{}", " ".repeat(LABEL_WIDTH - visible_len))
        } else {
            format!("{painted} ")
        }
    }

    fn add_symbol(&self, s: &str) -> String {
        self.paint(&self.add.clone().bold(), s)
    }
    fn change_symbol(&self, s: &str) -> String {
        self.paint(&self.change.clone().bold(), s)
    }
    fn delete_symbol(&self, s: &str) -> String {
        self.paint(&self.delete.clone().bold(), s)
    }
    fn error_op_symbol(&self, s: &str) -> String {
        self.paint(&self.error.clone().bold(), s)
    }
    fn noop_symbol(&self, s: &str) -> String {
        self.paint(&self.noop, s)
    }

    fn add_label(&self, s: &str) -> String {
        self.paint(&self.add, s)
    }
    fn change_label(&self, s: &str) -> String {
        self.paint(&self.change, s)
    }
    fn delete_label(&self, s: &str) -> String {
        self.paint(&self.delete, s)
    }
    fn error_op_label(&self, s: &str) -> String {
        self.paint(&self.error, s)
    }
    fn noop_label(&self, s: &str) -> String {
        self.paint(&self.noop, s)
    }

    fn primary_text(&self, s: &str) -> String {
        self.paint(&self.primary, s)
    }
    fn dim(&self, s: &str) -> String {
        self.paint(&self.dim, s)
    }
    fn error_detail(&self, s: &str) -> String {
        self.paint(&self.error, s)
    }

    fn header_command(&self, s: &str) -> String {
        self.paint(&self.header_command, s)
    }
    fn header_target(&self, s: &str) -> String {
        self.paint(&self.dim, s)
    }

    fn warn_prefix(&self, s: &str) -> String {
        self.paint(&self.warn_prefix, s)
    }
    fn error_prefix(&self, s: &str) -> String {
        self.paint(&self.error_prefix, s)
    }

    fn tally_label(&self, s: &str) -> String {
        self.paint(&self.tally_label, s)
    }

    fn status(&self, status: &str) -> String {
        if status.contains("FAILED") || status.contains("ROLLBACK") {
            self.paint(&self.error, status)
        } else if status.ends_with("_IN_PROGRESS") {
            self.paint(&self.change, status)
        } else if status.ends_with("_COMPLETE") {
            self.paint(&self.add, status)
        } else {
            self.paint(&self.dim, status)
        }
    }
}

fn should_color(choice: ColorChoice) -> bool {
    match choice {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => io::stdout().is_terminal(),
    }
}

#[cfg(test)]
mod tests;
