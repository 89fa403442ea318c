use std::io;
use std::path::PathBuf;

use stackline_domain::{DomainValidationError, OperationKind};
use thiserror::Error;

/// Render an error followed by each of its sources, separated by `: `.
#[must_use]
pub fn display_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut cause = error.source();
    while let Some(source) = cause {
        message.push_str(": ");
        message.push_str(&source.to_string());
        cause = source.source();
    }
    message
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault password must not be empty")]
    EmptyPassword,
    #[error("data is already vault encrypted")]
    AlreadyEncrypted,
    #[error("invalid vault header")]
    InvalidHeader,
    #[error("malformed vault payload")]
    MalformedBody,
    #[error("malformed vault payload encoding")]
    HexDecode {
        #[source]
        source: hex::FromHexError,
    },
    #[error("vault checksum mismatch (wrong password?)")]
    ChecksumMismatch,
    #[error("invalid padding in decrypted vault payload")]
    InvalidPadding,
    #[error("internal error: invalid vault key length")]
    InvalidKeyLength,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to start worker pool")]
    Build {
        #[source]
        source: rayon::ThreadPoolBuildError,
    },
}

#[derive(Debug, Error)]
pub enum KeyValueError {
    #[error("invalid YAML")]
    Yaml {
        #[source]
        source: serde_yaml::Error,
    },
    #[error("document must be a mapping of keys to values")]
    NotAMapping,
    #[error("key {key:?} must be a string")]
    NonStringKey { key: String },
    #[error("value of {key:?} must be a scalar")]
    NonScalarValue { key: String },
}

#[derive(Debug, Error)]
pub enum ValueError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("value root must be a directory: {root}")]
    RootIsNotDirectory { root: PathBuf },
    #[error("failed while walking value directory")]
    Walk {
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to read value file: {path}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is vault encrypted but no vault password was supplied")]
    NoPasswords { path: PathBuf },
    #[error("failed to decrypt {path} with any of the {attempts} supplied password(s)")]
    Decrypt {
        path: PathBuf,
        attempts: usize,
        #[source]
        source: VaultError,
    },
    #[error("failed to parse value file: {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: KeyValueError,
    },
    #[error("invalid variable override \"{entry}\": expected name=value")]
    InvalidOverride { entry: String },
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to canonicalize manifest path: {path}")]
    CanonicalizePath {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("manifest path has no parent: {path}")]
    MissingParent { path: PathBuf },
    #[error("failed to render manifest {path}")]
    Render {
        path: PathBuf,
        #[source]
        source: tera::Error,
    },
    #[error("failed to parse manifest: {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("manifest {field} is not a directory: {path}")]
    MissingDirectory { field: &'static str, path: PathBuf },
    #[error("manifest must name an s3Bucket")]
    MissingBucket,
    #[error("stack \"{name}\" is declared more than once")]
    DuplicateStack { name: String },
    #[error(transparent)]
    Domain(#[from] DomainValidationError),
}

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("failed to start the AWS client runtime")]
    Runtime {
        #[source]
        source: io::Error,
    },
    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        code: Option<String>,
        message: String,
    },
    #[error("{operation} response has no {field}")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },
    #[error("failed to build {operation} request")]
    Build {
        operation: &'static str,
        #[source]
        source: aws_sdk_cloudformation::error::BuildError,
    },
    #[error("stack {name} does not exist")]
    StackNotFound { name: String },
    #[error("no updates are to be performed on stack {stack}")]
    NoUpdates { stack: String },
    #[error("{message}")]
    Provider { message: String },
}

#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("{function}() takes {expected} argument(s), got {got}")]
    ArgumentCount {
        function: &'static str,
        expected: String,
        got: usize,
    },
    #[error("{function}() has no argument named `{argument}`")]
    UnexpectedArgument {
        function: &'static str,
        argument: String,
    },
    #[error("{function}() requires a `{argument}` argument")]
    MissingArgument {
        function: &'static str,
        argument: &'static str,
    },
    #[error("{function}() argument `{argument}` must be a string")]
    NonStringArgument {
        function: &'static str,
        argument: &'static str,
    },
    #[error("env(name=\"{name}\") is not set in the current environment")]
    EnvNotSet { name: String },
    #[error("there is no output key {key} in stack {stack}")]
    OutputNotFound { stack: String, key: String },
    #[error("failed to read template {path}")]
    ReadTemplate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Cloud(#[from] CloudError),
}

#[derive(Debug, Error)]
pub enum EvaluateError {
    #[error("unknown template function `{name}`")]
    UnknownFunction { name: String },
    #[error(transparent)]
    Function(#[from] FunctionError),
    #[error("template evaluation failed")]
    Render {
        #[source]
        source: tera::Error,
    },
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("failed to read parameter fragment of stack {stack}: {path}")]
    ReadFragment {
        stack: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to scan parameters of stack {stack}")]
    Scan {
        stack: String,
        #[source]
        source: EvaluateError,
    },
    #[error("dependency cycle detected among: {cycle}")]
    CycleDetected { cycle: String },
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to resolve parameters from {path}")]
    Evaluate {
        path: PathBuf,
        #[source]
        source: EvaluateError,
    },
    #[error("resolved parameters of {path} are invalid")]
    Parameters {
        path: PathBuf,
        #[source]
        source: KeyValueError,
    },
    #[error("template {path} is {size} bytes, exceeding the maximum of {limit} bytes")]
    TemplateTooLarge {
        path: PathBuf,
        size: usize,
        limit: usize,
    },
    #[error("template validation failed for {path}")]
    Validation {
        path: PathBuf,
        #[source]
        source: CloudError,
    },
    #[error(transparent)]
    Provider(#[from] CloudError),
    #[error("stack {stack} {kind} finished with status {status}")]
    OperationFailed {
        stack: String,
        kind: OperationKind,
        status: String,
    },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("upload source does not exist: {path}")]
    MissingSource { path: PathBuf },
    #[error("failed while walking upload directory")]
    Walk {
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to upload {path}")]
    Upload {
        path: PathBuf,
        #[source]
        source: CloudError,
    },
}

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("failed while walking template directory")]
    Walk {
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is {size} bytes, exceeding the maximum of {limit} bytes")]
    TemplateTooLarge {
        path: PathBuf,
        size: usize,
        limit: usize,
    },
    #[error("{target} is invalid")]
    Invalid {
        target: String,
        #[source]
        source: CloudError,
    },
}

#[derive(Debug, Error)]
pub enum VaultFileError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("no vault password supplied")]
    NoPassword,
    #[error("encryption takes exactly one password, got {count}")]
    TooManyPasswords { count: usize },
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is not vault encrypted")]
    NotEncrypted { path: PathBuf },
    #[error("failed to process {path}")]
    Codec {
        path: PathBuf,
        #[source]
        source: VaultError,
    },
    #[error("failed to prepare the edit buffer")]
    Buffer {
        #[source]
        source: io::Error,
    },
    #[error("editor {editor} not found")]
    EditorNotFound {
        editor: String,
        #[source]
        source: which::Error,
    },
    #[error("failed to launch editor {editor}")]
    Editor {
        editor: String,
        #[source]
        source: io::Error,
    },
    #[error("editor {editor} exited with {status}")]
    EditorFailed {
        editor: String,
        status: std::process::ExitStatus,
    },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Values(#[from] ValueError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Cloud(#[from] CloudError),
    #[error("refusing to delete without a stack selection (use --all to delete every stack)")]
    EmptyDeleteSelection,
    #[error("no stack found for the selection")]
    NoStackFound,
    #[error("unknown stack status {status}")]
    UnknownStatus { status: String },
    #[error("failed to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to render {path}")]
    Render {
        path: PathBuf,
        #[source]
        source: EvaluateError,
    },
}
