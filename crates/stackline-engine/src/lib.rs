mod aws_sdk;
mod cloud;
mod deploy;
mod discovery;
mod error;
#[cfg(test)]
mod fake_cloud;
mod graph;
mod inspect;
mod manifest;
mod pipeline;
mod pool;
mod template;
mod upload;
mod validate;
mod values;
mod vault;
mod vault_files;

pub use aws_sdk::{AwsBackend, StackEvent, events_since_operation_start};
pub use cloud::{
    CloudClients, IdentityApi, MAX_TEMPLATE_BODY, ObjectStore, StackApi, StackOutput,
    StackRequest, StackStatus, TemplateSource, object_url,
};
pub use deploy::{DeployMode, delete_stacks, deploy_stacks, ensure_bucket};
pub use error::{
    CloudError, DeployError, EvaluateError, FunctionError, GraphError, KeyValueError,
    ManifestError, PipelineError, PoolError, UploadError, ValidateError, ValueError, VaultError,
    VaultFileError, display_chain,
};
pub use graph::{DependencyGraph, GraphOrder, VertexId, build_dependency_graph, deployment_order};
pub use inspect::{
    STACK_STATUSES, describe_selected, list_stacks, parse_status_filter, resources_of_selected,
};
pub use manifest::{DEFAULT_MANIFEST, load_manifest};
pub use pipeline::{
    DeleteRequest, DeployRequest, TemplateRequest, delete_from_manifest, deploy_from_manifest,
    render_template_file,
};
pub use pool::{CancelToken, DEFAULT_WORKERS, TaskGroup};
pub use template::{
    Evaluation, EvaluationMode, Resolver, TemplateFunction, evaluate, resolve, scan_dependencies,
};
pub use upload::{UploadRequest, upload_path};
pub use validate::validate_templates;
pub use values::{
    ValueContext, load_layered_context, load_values, parse_key_values, parse_overrides,
};
pub use vault_files::{decrypt_files, edit_file, encrypt_files, launch_editor};

/// Ansible-vault compatible secret codec.
pub mod codec {
    pub use crate::vault::{decrypt, encrypt, has_header};
}
