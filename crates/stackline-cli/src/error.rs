use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    ArgumentParse(#[from] clap::Error),
    #[error("invalid stack selection")]
    Selection(#[from] stackline_domain::DomainValidationError),
    #[error("failed to read vault password file {path}")]
    PasswordFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Values(#[from] stackline_engine::ValueError),
    #[error(transparent)]
    Pipeline(#[from] stackline_engine::PipelineError),
    #[error(transparent)]
    Upload(#[from] stackline_engine::UploadError),
    #[error(transparent)]
    Validate(#[from] stackline_engine::ValidateError),
    #[error(transparent)]
    Vault(#[from] stackline_engine::VaultFileError),
    #[error(transparent)]
    Report(#[from] stackline_report::ReportError),
    #[error("vault edit takes exactly one file, got {count}")]
    EditTakesOneFile { count: usize },
}
