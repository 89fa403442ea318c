use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use stackline_domain::{OperationKind, StackDetail, StackResource, StackSummary};

use crate::error::CloudError;

pub use stackline_domain::StackOutput;

/// Provider message returned when an update would not change the stack.
pub const NO_UPDATE_SIGNATURE: &str = "No updates are to be performed";

/// Template bodies above this size must be passed by URL.
pub const MAX_TEMPLATE_BODY: usize = 51_200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Body(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    pub name: String,
    pub template: TemplateSource,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub capabilities: Vec<String>,
}

/// Last status reported for a stack operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackStatus(pub String);

impl StackStatus {
    #[must_use]
    pub fn is_success(&self, kind: OperationKind) -> bool {
        self.0 == kind.success_status()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !self.0.ends_with("_IN_PROGRESS")
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

pub trait StackApi: Send + Sync {
    /// Validate a template, returning the capabilities it requires.
    ///
    /// # Errors
    ///
    /// Returns the provider error for an invalid template.
    fn validate_template(&self, source: &TemplateSource) -> Result<Vec<String>, CloudError>;

    /// # Errors
    ///
    /// Returns an error when the provider cannot be queried.
    fn stack_exists(&self, name: &str) -> Result<bool, CloudError>;

    /// Start stack creation, returning the stack id.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the request is rejected.
    fn create_stack(&self, request: &StackRequest) -> Result<String, CloudError>;

    /// Start a stack update, returning the stack id.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the request is rejected, including the
    /// no-update condition.
    fn update_stack(&self, request: &StackRequest) -> Result<String, CloudError>;

    /// # Errors
    ///
    /// Returns the provider error when the request is rejected.
    fn delete_stack(&self, name: &str) -> Result<(), CloudError>;

    /// Block until the running operation reaches a terminal status.
    ///
    /// # Errors
    ///
    /// Returns an error when polling fails.
    fn wait_for_stack(&self, name: &str, kind: OperationKind) -> Result<StackStatus, CloudError>;

    /// # Errors
    ///
    /// Returns an error when the stack cannot be described.
    fn stack_outputs(&self, name: &str, profile: Option<&str>)
    -> Result<Vec<StackOutput>, CloudError>;

    /// Every stack of the account and region, optionally restricted to the
    /// given statuses.
    ///
    /// # Errors
    ///
    /// Returns an error when a listing page cannot be fetched.
    fn list_stacks(&self, statuses: &[String]) -> Result<Vec<StackSummary>, CloudError>;

    /// # Errors
    ///
    /// Returns [`CloudError::StackNotFound`] for an unknown stack.
    fn describe_stack(&self, name: &str) -> Result<StackDetail, CloudError>;

    /// # Errors
    ///
    /// Returns [`CloudError::StackNotFound`] for an unknown stack.
    fn stack_resources(&self, name: &str) -> Result<Vec<StackResource>, CloudError>;
}

pub trait ObjectStore: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the provider cannot be queried.
    fn bucket_exists(&self, bucket: &str) -> Result<bool, CloudError>;

    /// # Errors
    ///
    /// Returns the provider error when the bucket cannot be created.
    fn create_bucket(&self, bucket: &str) -> Result<(), CloudError>;

    /// Store `body` under `key`, returning the object URL.
    ///
    /// # Errors
    ///
    /// Returns the provider error when the upload fails.
    fn upload(&self, bucket: &str, key: &str, body: &[u8]) -> Result<String, CloudError>;
}

pub trait IdentityApi: Send + Sync {
    /// # Errors
    ///
    /// Returns an error when the caller identity cannot be resolved.
    fn account_id(&self) -> Result<String, CloudError>;
}

/// Provider handles for one run.
#[derive(Clone)]
pub struct CloudClients {
    pub stacks: Arc<dyn StackApi>,
    pub objects: Arc<dyn ObjectStore>,
    pub identity: Arc<dyn IdentityApi>,
}

impl CloudClients {
    /// Use one backend for every provider concern.
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: StackApi + ObjectStore + IdentityApi + 'static,
    {
        Self {
            stacks: Arc::clone(&backend) as Arc<dyn StackApi>,
            objects: Arc::clone(&backend) as Arc<dyn ObjectStore>,
            identity: backend,
        }
    }
}

impl fmt::Debug for CloudClients {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("CloudClients").finish_non_exhaustive()
    }
}

#[must_use]
pub fn object_url(bucket: &str, key: &str) -> String {
    format!("https://{bucket}.s3.amazonaws.com/{key}")
}

/// Whether a provider error is the benign "nothing to update" rejection.
#[must_use]
pub const fn is_no_update_error(error: &CloudError) -> bool {
    matches!(error, CloudError::NoUpdates { .. })
}
