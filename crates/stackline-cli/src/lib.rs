// Target-specific transitive dependency split (mio/crossterm stack) is accepted for now.
#![allow(clippy::multiple_crate_versions)]

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use minus::{ExitStrategy, Pager, page_all};
use stackline_domain::{StackFilter, VaultAction};
use stackline_engine::{
    AwsBackend, CloudClients, DEFAULT_MANIFEST, DeleteRequest, DeployMode, DeployRequest,
    TemplateRequest, UploadRequest, decrypt_files, delete_from_manifest, deploy_from_manifest,
    describe_selected, edit_file, encrypt_files, launch_editor, list_stacks, parse_overrides,
    parse_status_filter, render_template_file, resources_of_selected, upload_path,
    validate_templates,
};
use stackline_report::{
    ColorChoice, OutputFormat, RenderOptions, redact_sensitive, render_deploy,
    render_stack_details, render_stack_list, render_stack_resources, render_uploads,
    render_validated, render_vault,
};
use tracing::debug;

mod error;
mod logging;
mod passwords;

pub use error::CliError;
pub use logging::{LOG_ENV, init_logging};
pub use passwords::{DEFAULT_PASSWORD_FILE, PASSWORD_ENV, PASSWORD_FILE_ENV, discover_passwords};
pub use stackline_engine::display_chain;

#[derive(Debug, Parser)]
#[command(
    name = "stackline",
    version,
    about = "Deploy ordered CloudFormation stacks from templated parameters"
)]
struct Cli {
    #[command(flatten)]
    render: RenderFlags,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create or update stacks in dependency order.
    Deploy {
        #[command(flatten)]
        manifest: ManifestArgs,
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        vault: VaultArgs,
        #[command(flatten)]
        aws: AwsArgs,
        /// Environment folder layered over `default`.
        #[arg(short, long)]
        env: Option<String>,
        /// Value overrides, `key=value,...`.
        #[arg(long)]
        vars: Option<String>,
        /// Resolve parameters and validate templates without deploying.
        #[arg(long, conflicts_with = "params_only")]
        dry_run: bool,
        /// Only print resolved parameters.
        #[arg(long)]
        params_only: bool,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
        /// Print secret values instead of masking them.
        #[arg(long)]
        show_secrets: bool,
    },
    /// Delete stacks, consumers first.
    Delete {
        #[command(flatten)]
        manifest: ManifestArgs,
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        vault: VaultArgs,
        #[command(flatten)]
        aws: AwsArgs,
        /// Delete every stack of the manifest.
        #[arg(long)]
        all: bool,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
    /// Validate template files, directories or URLs.
    Validate {
        #[arg(required = true)]
        targets: Vec<String>,
        #[arg(short, long)]
        recursive: bool,
        #[command(flatten)]
        aws: AwsArgs,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
    /// Upload a file or a directory to a bucket.
    Upload {
        source: PathBuf,
        #[arg(long)]
        bucket: String,
        #[arg(long, default_value = "")]
        prefix: String,
        #[arg(short, long)]
        recursive: bool,
        /// File names to skip, comma separated.
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<String>,
        #[command(flatten)]
        aws: AwsArgs,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
    /// Inspect deployed stacks.
    #[command(subcommand)]
    Stack(StackCommand),
    /// Work with template files.
    #[command(subcommand)]
    Template(TemplateCommand),
    /// Encrypt, decrypt or edit value files in place.
    Vault {
        #[arg(value_enum)]
        action: VaultActionArg,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[command(flatten)]
        vault: VaultArgs,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
}

#[derive(Debug, Subcommand)]
enum StackCommand {
    /// List every stack of the account.
    List {
        /// Status filter, comma separated.
        #[arg(long)]
        status: Option<String>,
        #[command(flatten)]
        aws: AwsArgs,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
    /// Show the deployed state of manifest stacks.
    Get {
        #[command(flatten)]
        manifest: ManifestArgs,
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        aws: AwsArgs,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
    /// Show the resources of manifest stacks.
    GetResources {
        #[command(flatten)]
        manifest: ManifestArgs,
        #[command(flatten)]
        selection: SelectionArgs,
        #[command(flatten)]
        aws: AwsArgs,
        #[arg(long, value_enum, default_value_t = FormatArg::Text)]
        format: FormatArg,
    },
}

#[derive(Debug, Subcommand)]
enum TemplateCommand {
    /// Render a file with the manifest's values and template functions.
    Parse {
        path: PathBuf,
        #[command(flatten)]
        manifest: ManifestArgs,
        #[command(flatten)]
        vault: VaultArgs,
        #[command(flatten)]
        aws: AwsArgs,
        #[arg(short, long)]
        env: Option<String>,
        /// Value overrides, `key=value,...`.
        #[arg(long)]
        vars: Option<String>,
        /// Print secret values instead of masking them.
        #[arg(long)]
        show_secrets: bool,
    },
}

#[derive(Debug, Clone, Args)]
struct ManifestArgs {
    /// Manifest file.
    #[arg(short = 'f', long = "file", default_value = DEFAULT_MANIFEST)]
    path: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct SelectionArgs {
    /// Stack names, comma separated.
    #[arg(long)]
    stacks: Option<String>,
    /// Stack tags that must all match, `key=value,...`.
    #[arg(long)]
    tags: Option<String>,
}

impl SelectionArgs {
    fn filter(&self) -> Result<StackFilter, CliError> {
        Ok(StackFilter::parse(
            self.stacks.as_deref(),
            self.tags.as_deref(),
        )?)
    }
}

#[derive(Debug, Clone, Args)]
struct VaultArgs {
    /// Vault passwords, comma separated.
    #[arg(long)]
    vault_password: Option<String>,
    #[arg(long)]
    vault_password_file: Option<PathBuf>,
}

impl VaultArgs {
    fn passwords(&self) -> Result<Vec<String>, CliError> {
        discover_passwords(
            self.vault_password.as_deref(),
            self.vault_password_file.as_deref(),
        )
    }
}

#[derive(Debug, Clone, Args)]
struct AwsArgs {
    #[arg(long)]
    profile: Option<String>,
    #[arg(long)]
    region: Option<String>,
}

impl AwsArgs {
    fn clients(&self) -> CloudClients {
        CloudClients::from_backend(Arc::new(AwsBackend::new(
            self.profile.clone(),
            self.region.clone(),
        )))
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorArg {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VaultActionArg {
    Encrypt,
    Decrypt,
    Edit,
}

#[derive(Debug, Clone, Args)]
struct RenderFlags {
    #[arg(long, global = true, value_enum, default_value_t = ColorArg::Auto)]
    color: ColorArg,
    /// Debug logging and per-stack parameters in reports.
    #[arg(short, long, global = true)]
    verbose: bool,
}

impl RenderFlags {
    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            color: self.color.into(),
            verbose: self.verbose,
        }
    }
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
        }
    }
}

impl From<ColorArg> for ColorChoice {
    fn from(value: ColorArg) -> Self {
        match value {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}

impl From<VaultActionArg> for VaultAction {
    fn from(value: VaultActionArg) -> Self {
        match value {
            VaultActionArg::Encrypt => Self::Encrypt,
            VaultActionArg::Decrypt => Self::Decrypt,
            VaultActionArg::Edit => Self::Edit,
        }
    }
}

/// Run the CLI using process arguments.
///
/// # Errors
///
/// Returns an error when argument parsing fails (excluding help/version) or command
/// execution fails.
pub fn run() -> Result<i32, CliError> {
    run_from(std::env::args_os())
}

fn run_from<I, T>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(parsed) => parsed,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(error.into()),
        },
    };
    init_logging(cli.render.verbose);
    let options = cli.render.render_options();

    match cli.command {
        Commands::Deploy {
            manifest,
            selection,
            vault,
            aws,
            env,
            vars,
            dry_run,
            params_only,
            format,
            show_secrets,
        } => {
            let mode = if params_only {
                DeployMode::ParamsOnly
            } else if dry_run {
                DeployMode::DryRun
            } else {
                DeployMode::Apply
            };
            let overrides = match vars.as_deref() {
                Some(vars) => parse_overrides(vars)?,
                None => Vec::new(),
            };
            let request = DeployRequest {
                manifest: manifest.path,
                environment: env,
                filter: selection.filter()?,
                overrides,
                passwords: vault.passwords()?,
                mode,
            };
            debug!(?mode, "starting deploy");

            let (report, sensitive) = deploy_from_manifest(&request, &aws.clients())?;
            let sensitive = if show_secrets {
                BTreeSet::new()
            } else {
                sensitive
            };
            let output_format = format.into();
            let rendered = render_deploy(&report, output_format, &options)?;
            emit_output(&rendered, output_format, &sensitive);
            Ok(i32::from(report.has_failures()))
        }
        Commands::Delete {
            manifest,
            selection,
            vault,
            aws,
            all,
            format,
        } => {
            let request = DeleteRequest {
                manifest: manifest.path,
                filter: selection.filter()?,
                all,
                passwords: vault.passwords()?,
            };
            let report = delete_from_manifest(&request, &aws.clients())?;
            let output_format = format.into();
            let rendered = render_deploy(&report, output_format, &options)?;
            emit_output(&rendered, output_format, &BTreeSet::new());
            Ok(i32::from(report.has_failures()))
        }
        Commands::Validate {
            targets,
            recursive,
            aws,
            format,
        } => {
            let clients = aws.clients();
            let validated = validate_templates(clients.stacks.as_ref(), &targets, recursive)?;
            let output_format = format.into();
            let rendered = render_validated(&validated, output_format, &options)?;
            emit_output(&rendered, output_format, &BTreeSet::new());
            Ok(0)
        }
        Commands::Upload {
            source,
            bucket,
            prefix,
            recursive,
            exclude,
            aws,
            format,
        } => {
            let clients = aws.clients();
            let request = UploadRequest {
                source: &source,
                bucket: &bucket,
                prefix: &prefix,
                recursive,
                exclude: &exclude,
            };
            let uploaded = upload_path(clients.objects.as_ref(), &request)?;
            let output_format = format.into();
            let rendered = render_uploads(&uploaded, output_format, &options)?;
            emit_output(&rendered, output_format, &BTreeSet::new());
            Ok(0)
        }
        Commands::Stack(command) => run_stack(command, &options),
        Commands::Template(TemplateCommand::Parse {
            path,
            manifest,
            vault,
            aws,
            env,
            vars,
            show_secrets,
        }) => {
            let overrides = match vars.as_deref() {
                Some(vars) => parse_overrides(vars)?,
                None => Vec::new(),
            };
            let request = TemplateRequest {
                manifest: manifest.path,
                path,
                environment: env,
                overrides,
                passwords: vault.passwords()?,
            };
            let (rendered, sensitive) = render_template_file(&request, &aws.clients())?;
            let sensitive = if show_secrets {
                BTreeSet::new()
            } else {
                sensitive
            };
            emit_output(&rendered, OutputFormat::Text, &sensitive);
            Ok(0)
        }
        Commands::Vault {
            action,
            files,
            vault,
            format,
        } => {
            let passwords = vault.passwords()?;
            let action = VaultAction::from(action);
            let done = match action {
                VaultAction::Encrypt => encrypt_files(&files, &passwords)?,
                VaultAction::Decrypt => decrypt_files(&files, &passwords)?,
                VaultAction::Edit => {
                    let [file] = files.as_slice() else {
                        return Err(CliError::EditTakesOneFile { count: files.len() });
                    };
                    if edit_file(file, &passwords, launch_editor)? {
                        vec![file.clone()]
                    } else {
                        Vec::new()
                    }
                }
            };
            let output_format = format.into();
            let rendered = render_vault(action, &done, output_format, &options)?;
            emit_output(&rendered, output_format, &BTreeSet::new());
            Ok(0)
        }
    }
}

fn run_stack(command: StackCommand, options: &RenderOptions) -> Result<i32, CliError> {
    let (rendered, format) = match command {
        StackCommand::List {
            status,
            aws,
            format,
        } => {
            let statuses = match status.as_deref() {
                Some(status) => parse_status_filter(status)?,
                None => Vec::new(),
            };
            let clients = aws.clients();
            let summaries = list_stacks(clients.stacks.as_ref(), &statuses)?;
            (render_stack_list(&summaries, format.into(), options)?, format)
        }
        StackCommand::Get {
            manifest,
            selection,
            aws,
            format,
        } => {
            let clients = aws.clients();
            let lookup =
                describe_selected(&manifest.path, &selection.filter()?, clients.stacks.as_ref())?;
            (render_stack_details(&lookup, format.into(), options)?, format)
        }
        StackCommand::GetResources {
            manifest,
            selection,
            aws,
            format,
        } => {
            let clients = aws.clients();
            let lookup = resources_of_selected(
                &manifest.path,
                &selection.filter()?,
                clients.stacks.as_ref(),
            )?;
            (render_stack_resources(&lookup, format.into(), options)?, format)
        }
    };
    emit_output(&rendered, format.into(), &BTreeSet::new());
    Ok(0)
}

fn emit_output(rendered: &str, format: OutputFormat, sensitive_values: &BTreeSet<String>) {
    let redacted = redact_sensitive(rendered, sensitive_values);

    if format == OutputFormat::Text && should_use_pager() && page_output(&redacted).is_ok() {
        return;
    }

    if redacted.ends_with('\n') {
        print!("{redacted}");
    } else {
        println!("{redacted}");
    }
}

fn should_use_pager() -> bool {
    std::io::stdout().is_terminal() && std::env::var_os("NO_PAGER").is_none()
}

fn page_output(rendered: &str) -> Result<(), minus::MinusError> {
    let pager = Pager::new();
    pager.set_exit_strategy(ExitStrategy::PagerQuit)?;
    pager.set_text(rendered)?;
    page_all(pager)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::panic)]

    use clap::Parser;

    use super::{Cli, Commands, StackCommand, TemplateCommand, VaultActionArg, run_from};
    use crate::CliError;

    #[test]
    fn deploy_flags_parse() {
        let cli = Cli::try_parse_from([
            "stackline",
            "deploy",
            "-f",
            "infra/stacks.yaml",
            "--env",
            "staging",
            "--stacks",
            "vpc,app",
            "--params-only",
            "--verbose",
        ])
        .expect("parse");

        assert!(cli.render.verbose);
        let Commands::Deploy {
            manifest,
            env,
            selection,
            params_only,
            ..
        } = cli.command
        else {
            panic!("expected deploy");
        };
        assert_eq!(manifest.path.to_str(), Some("infra/stacks.yaml"));
        assert_eq!(env.as_deref(), Some("staging"));
        assert_eq!(selection.stacks.as_deref(), Some("vpc,app"));
        assert!(params_only);
    }

    #[test]
    fn dry_run_conflicts_with_params_only() {
        let error = run_from(["stackline", "deploy", "--dry-run", "--params-only"])
            .expect_err("must fail");
        assert!(matches!(error, CliError::ArgumentParse(_)));
    }

    #[test]
    fn upload_exclude_is_comma_separated() {
        let cli = Cli::try_parse_from([
            "stackline",
            "upload",
            "templates",
            "--bucket",
            "artifacts",
            "--exclude",
            "README.md,.DS_Store",
        ])
        .expect("parse");
        let Commands::Upload { exclude, .. } = cli.command else {
            panic!("expected upload");
        };
        assert_eq!(exclude, vec!["README.md", ".DS_Store"]);
    }

    #[test]
    fn help_exits_cleanly() {
        assert_eq!(run_from(["stackline", "--help"]).expect("help"), 0);
    }

    #[test]
    fn vault_requires_files() {
        let error = run_from(["stackline", "vault", "encrypt"]).expect_err("must fail");
        assert!(matches!(error, CliError::ArgumentParse(_)));
    }

    #[test]
    fn stack_inspection_commands_parse() {
        let cli = Cli::try_parse_from(["stackline", "stack", "list", "--status", "CREATE_COMPLETE"])
            .expect("parse");
        let Commands::Stack(StackCommand::List { status, .. }) = cli.command else {
            panic!("expected stack list");
        };
        assert_eq!(status.as_deref(), Some("CREATE_COMPLETE"));

        let cli = Cli::try_parse_from([
            "stackline",
            "stack",
            "get-resources",
            "-f",
            "infra/stacks.yaml",
            "--tags",
            "tier=core",
        ])
        .expect("parse");
        let Commands::Stack(StackCommand::GetResources {
            manifest, selection, ..
        }) = cli.command
        else {
            panic!("expected stack get-resources");
        };
        assert_eq!(manifest.path.to_str(), Some("infra/stacks.yaml"));
        assert_eq!(selection.tags.as_deref(), Some("tier=core"));
    }

    #[test]
    fn template_parse_takes_a_path() {
        let cli = Cli::try_parse_from([
            "stackline",
            "template",
            "parse",
            "templates/user-data.sh",
            "--env",
            "staging",
        ])
        .expect("parse");
        let Commands::Template(TemplateCommand::Parse { path, env, .. }) = cli.command else {
            panic!("expected template parse");
        };
        assert_eq!(path.to_str(), Some("templates/user-data.sh"));
        assert_eq!(env.as_deref(), Some("staging"));

        let error = run_from(["stackline", "template", "parse"]).expect_err("must fail");
        assert!(matches!(error, CliError::ArgumentParse(_)));
    }

    #[test]
    fn vault_edit_takes_one_file() {
        let cli = Cli::try_parse_from(["stackline", "vault", "edit", "secrets.yaml"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Commands::Vault {
                action: VaultActionArg::Edit,
                ..
            }
        ));

        let error = run_from([
            "stackline",
            "vault",
            "edit",
            "a.yaml",
            "b.yaml",
            "--vault-password",
            "pw",
        ])
        .expect_err("must fail");
        assert!(matches!(error, CliError::EditTakesOneFile { count: 2 }));
    }
}
