use std::collections::{BTreeMap, BTreeSet};
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_cloudformation::error::{
    BuildError, DisplayErrorContext, ProvideErrorMetadata, SdkError,
};
use aws_sdk_cloudformation::types::{Capability, Parameter, Stack, Tag};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use stackline_domain::{OperationKind, StackDetail, StackResource, StackSummary};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::cloud::{
    IdentityApi, NO_UPDATE_SIGNATURE, ObjectStore, StackApi, StackOutput, StackRequest,
    StackStatus, TemplateSource, object_url,
};
use crate::error::CloudError;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const STACK_RESOURCE_TYPE: &str = "AWS::CloudFormation::Stack";
/// Error code CloudFormation uses for unknown stacks and empty updates.
const VALIDATION_ERROR: &str = "ValidationError";

type StackClient = aws_sdk_cloudformation::Client;

/// Provider backend on the AWS SDK.
///
/// The SDK is asynchronous; the backend owns a tokio runtime and blocks on it
/// so callers stay synchronous. Configuration is loaded on first use.
pub struct AwsBackend {
    profile: Option<String>,
    region: Option<String>,
    poll_interval: Duration,
    connection: Mutex<Option<Arc<Connection>>>,
    profile_clients: Mutex<BTreeMap<String, StackClient>>,
    reported_events: Mutex<BTreeSet<String>>,
}

struct Connection {
    runtime: Runtime,
    region: Option<String>,
    stacks: StackClient,
    objects: aws_sdk_s3::Client,
    identity: aws_sdk_sts::Client,
}

impl fmt::Debug for AwsBackend {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AwsBackend")
            .field("profile", &self.profile)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// A stack event as reported while waiting on an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackEvent {
    pub event_id: String,
    pub logical_resource_id: String,
    pub resource_type: String,
    pub resource_status: String,
    pub resource_status_reason: Option<String>,
}

// Accessors of required members return the value, optional ones an `Option`.
trait FieldText {
    fn text(self) -> String;
    fn optional_text(self) -> Option<String>;
}

impl<T: AsRef<str> + ?Sized> FieldText for &T {
    fn text(self) -> String {
        self.as_ref().to_string()
    }

    fn optional_text(self) -> Option<String> {
        Some(self.as_ref().to_string())
    }
}

impl<T: AsRef<str> + ?Sized> FieldText for Option<&T> {
    fn text(self) -> String {
        self.map(|value| value.as_ref().to_string())
            .unwrap_or_default()
    }

    fn optional_text(self) -> Option<String> {
        self.map(|value| value.as_ref().to_string())
    }
}

// Builders of shapes with required members are fallible.
trait Finish<T> {
    fn finish(self, operation: &'static str) -> Result<T, CloudError>;
}

impl Finish<Tag> for Tag {
    fn finish(self, _operation: &'static str) -> Result<Tag, CloudError> {
        Ok(self)
    }
}

impl Finish<Tag> for Result<Tag, BuildError> {
    fn finish(self, operation: &'static str) -> Result<Tag, CloudError> {
        self.map_err(|source| CloudError::Build { operation, source })
    }
}

fn api_error<E, R>(operation: &'static str, error: &SdkError<E, R>) -> CloudError
where
    E: ProvideErrorMetadata + StdError + 'static,
    R: fmt::Debug,
{
    let (code, message) = match error.as_service_error() {
        Some(service) => (
            service.code().map(str::to_string),
            service.message().map(str::to_string),
        ),
        None => (None, None),
    };
    CloudError::Api {
        operation,
        code,
        message: message.unwrap_or_else(|| DisplayErrorContext(error).to_string()),
    }
}

/// Turn the validation errors CloudFormation uses for unknown stacks and
/// empty updates into their typed variants.
fn classify(error: CloudError, stack: &str) -> CloudError {
    let CloudError::Api {
        code: Some(code),
        message,
        ..
    } = &error
    else {
        return error;
    };
    if code != VALIDATION_ERROR {
        return error;
    }
    if message.contains(NO_UPDATE_SIGNATURE) {
        return CloudError::NoUpdates {
            stack: stack.to_string(),
        };
    }
    if message.contains("does not exist") {
        return CloudError::StackNotFound {
            name: stack.to_string(),
        };
    }
    error
}

fn stack_error<E, R>(operation: &'static str, stack: &str, error: &SdkError<E, R>) -> CloudError
where
    E: ProvideErrorMetadata + StdError + 'static,
    R: fmt::Debug,
{
    classify(api_error(operation, error), stack)
}

async fn load_config(profile: Option<&str>, region: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    loader.load().await
}

fn template_fields(template: &TemplateSource) -> (Option<String>, Option<String>) {
    match template {
        TemplateSource::Body(body) => (Some(body.clone()), None),
        TemplateSource::Url(url) => (None, Some(url.clone())),
    }
}

fn parameters(request: &StackRequest) -> Vec<Parameter> {
    request
        .parameters
        .iter()
        .map(|(key, value)| {
            Parameter::builder()
                .parameter_key(key)
                .parameter_value(value)
                .build()
        })
        .collect()
}

fn tags(request: &StackRequest, operation: &'static str) -> Result<Vec<Tag>, CloudError> {
    request
        .tags
        .iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build().finish(operation))
        .collect()
}

fn capabilities(request: &StackRequest) -> Vec<Capability> {
    request
        .capabilities
        .iter()
        .map(|capability| Capability::from(capability.as_str()))
        .collect()
}

fn stack_outputs_of(stack: &Stack) -> Vec<StackOutput> {
    stack
        .outputs()
        .iter()
        .map(|output| StackOutput {
            key: output.output_key().text(),
            value: output.output_value().text(),
            export_name: output.export_name().optional_text(),
        })
        .collect()
}

fn stack_detail(stack: &Stack) -> StackDetail {
    StackDetail {
        name: stack.stack_name().text(),
        status: stack.stack_status().text(),
        reason: stack.stack_status_reason().optional_text(),
        description: stack.description().optional_text(),
        parameters: stack
            .parameters()
            .iter()
            .map(|parameter| {
                (
                    parameter.parameter_key().text(),
                    parameter.parameter_value().text(),
                )
            })
            .collect(),
        outputs: stack_outputs_of(stack),
        tags: stack
            .tags()
            .iter()
            .map(|tag| (tag.key().text(), tag.value().text()))
            .collect(),
    }
}

impl Default for AwsBackend {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl AwsBackend {
    /// A backend for `profile` and `region`; both fall back to the SDK's
    /// default resolution when unset.
    #[must_use]
    pub fn new(profile: Option<String>, region: Option<String>) -> Self {
        Self {
            profile,
            region,
            poll_interval: POLL_INTERVAL,
            connection: Mutex::new(None),
            profile_clients: Mutex::new(BTreeMap::new()),
            reported_events: Mutex::new(BTreeSet::new()),
        }
    }

    fn connection(&self) -> Result<Arc<Connection>, CloudError> {
        let mut slot = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = slot.as_ref() {
            return Ok(Arc::clone(connection));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("stackline-aws")
            .build()
            .map_err(|source| CloudError::Runtime { source })?;
        let config = runtime.block_on(load_config(
            self.profile.as_deref(),
            self.region.as_deref(),
        ));
        debug!(
            profile = self.profile.as_deref().unwrap_or("default"),
            region = ?config.region(),
            "loaded AWS configuration"
        );

        let connection = Arc::new(Connection {
            region: config.region().map(ToString::to_string),
            stacks: StackClient::new(&config),
            objects: aws_sdk_s3::Client::new(&config),
            identity: aws_sdk_sts::Client::new(&config),
            runtime,
        });
        *slot = Some(Arc::clone(&connection));
        Ok(connection)
    }

    fn block_on<F: Future>(&self, future: F) -> Result<F::Output, CloudError> {
        Ok(self.connection()?.runtime.block_on(future))
    }

    fn stack_client(&self, profile: Option<&str>) -> Result<StackClient, CloudError> {
        let connection = self.connection()?;
        let Some(profile) = profile.filter(|profile| Some(*profile) != self.profile.as_deref())
        else {
            return Ok(connection.stacks.clone());
        };

        let mut clients = self
            .profile_clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(profile) {
            return Ok(client.clone());
        }
        let config = connection
            .runtime
            .block_on(load_config(Some(profile), self.region.as_deref()));
        let client = StackClient::new(&config);
        clients.insert(profile.to_string(), client.clone());
        Ok(client)
    }

    fn describe(&self, client: &StackClient, name: &str) -> Result<Stack, CloudError> {
        let output = self
            .block_on(client.describe_stacks().stack_name(name).send())?
            .map_err(|error| stack_error("DescribeStacks", name, &error))?;
        output
            .stacks()
            .first()
            .cloned()
            .ok_or_else(|| CloudError::StackNotFound {
                name: name.to_string(),
            })
    }

    fn report_events(&self, client: &StackClient, name: &str) -> Result<(), CloudError> {
        let response = self.block_on(client.describe_stack_events().stack_name(name).send())?;
        let output = match response {
            Ok(output) => output,
            Err(error) => {
                return match stack_error("DescribeStackEvents", name, &error) {
                    CloudError::StackNotFound { .. } => Ok(()),
                    other => Err(other),
                };
            }
        };

        let events: Vec<StackEvent> = output
            .stack_events()
            .iter()
            .map(|event| StackEvent {
                event_id: event.event_id().text(),
                logical_resource_id: event.logical_resource_id().text(),
                resource_type: event.resource_type().text(),
                resource_status: event.resource_status().text(),
                resource_status_reason: event.resource_status_reason().optional_text(),
            })
            .collect();

        let current = events_since_operation_start(&events, name);
        let mut reported = self
            .reported_events
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for event in current.iter().rev() {
            if !reported.insert(event.event_id.clone()) {
                continue;
            }
            info!(
                stack = name,
                resource = %event.logical_resource_id,
                kind = %event.resource_type,
                status = %event.resource_status,
                reason = event.resource_status_reason.as_deref().unwrap_or_default(),
                "stack event"
            );
        }
        Ok(())
    }
}

/// Events of the operation currently running on `stack`.
///
/// `events` are newest first; the window ends at the stack's own
/// `*_IN_PROGRESS` marker that started the operation.
#[must_use]
pub fn events_since_operation_start<'a>(events: &'a [StackEvent], stack: &str) -> &'a [StackEvent] {
    let start = events.iter().position(|event| {
        event.logical_resource_id == stack
            && event.resource_type == STACK_RESOURCE_TYPE
            && matches!(
                event.resource_status.as_str(),
                "CREATE_IN_PROGRESS" | "UPDATE_IN_PROGRESS" | "DELETE_IN_PROGRESS"
            )
    });
    match start {
        Some(index) => &events[..=index],
        None => events,
    }
}

impl StackApi for AwsBackend {
    fn validate_template(&self, source: &TemplateSource) -> Result<Vec<String>, CloudError> {
        let client = self.stack_client(None)?;
        let (body, url) = template_fields(source);
        let output = self
            .block_on(
                client
                    .validate_template()
                    .set_template_body(body)
                    .set_template_url(url)
                    .send(),
            )?
            .map_err(|error| api_error("ValidateTemplate", &error))?;
        Ok(output
            .capabilities()
            .iter()
            .map(|capability| capability.as_str().to_string())
            .collect())
    }

    fn stack_exists(&self, name: &str) -> Result<bool, CloudError> {
        let client = self.stack_client(None)?;
        match self.describe(&client, name) {
            Ok(_) => Ok(true),
            Err(CloudError::StackNotFound { .. }) => Ok(false),
            Err(error) => Err(error),
        }
    }

    fn create_stack(&self, request: &StackRequest) -> Result<String, CloudError> {
        const OPERATION: &str = "CreateStack";
        let client = self.stack_client(None)?;
        let (body, url) = template_fields(&request.template);
        let output = self
            .block_on(
                client
                    .create_stack()
                    .stack_name(&request.name)
                    .set_template_body(body)
                    .set_template_url(url)
                    .set_parameters(Some(parameters(request)))
                    .set_tags(Some(tags(request, OPERATION)?))
                    .set_capabilities(Some(capabilities(request)))
                    .send(),
            )?
            .map_err(|error| stack_error(OPERATION, &request.name, &error))?;
        output
            .stack_id()
            .optional_text()
            .ok_or(CloudError::MissingField {
                operation: OPERATION,
                field: "StackId",
            })
    }

    fn update_stack(&self, request: &StackRequest) -> Result<String, CloudError> {
        const OPERATION: &str = "UpdateStack";
        let client = self.stack_client(None)?;
        let (body, url) = template_fields(&request.template);
        let output = self
            .block_on(
                client
                    .update_stack()
                    .stack_name(&request.name)
                    .set_template_body(body)
                    .set_template_url(url)
                    .set_parameters(Some(parameters(request)))
                    .set_tags(Some(tags(request, OPERATION)?))
                    .set_capabilities(Some(capabilities(request)))
                    .send(),
            )?
            .map_err(|error| stack_error(OPERATION, &request.name, &error))?;
        output
            .stack_id()
            .optional_text()
            .ok_or(CloudError::MissingField {
                operation: OPERATION,
                field: "StackId",
            })
    }

    fn delete_stack(&self, name: &str) -> Result<(), CloudError> {
        let client = self.stack_client(None)?;
        self.block_on(client.delete_stack().stack_name(name).send())?
            .map_err(|error| stack_error("DeleteStack", name, &error))?;
        Ok(())
    }

    fn wait_for_stack(&self, name: &str, kind: OperationKind) -> Result<StackStatus, CloudError> {
        let client = self.stack_client(None)?;
        loop {
            self.report_events(&client, name)?;
            let status = match self.describe(&client, name) {
                Ok(stack) => StackStatus(stack.stack_status().text()),
                Err(CloudError::StackNotFound { .. }) if kind == OperationKind::Delete => {
                    StackStatus(kind.success_status().to_string())
                }
                Err(error) => return Err(error),
            };

            if status.0.is_empty() {
                return Err(CloudError::MissingField {
                    operation: "DescribeStacks",
                    field: "StackStatus",
                });
            }
            if status.is_terminal() {
                return Ok(status);
            }
            debug!(stack = name, %status, "waiting for stack operation");
            thread::sleep(self.poll_interval);
        }
    }

    fn stack_outputs(
        &self,
        name: &str,
        profile: Option<&str>,
    ) -> Result<Vec<StackOutput>, CloudError> {
        let client = self.stack_client(profile)?;
        let stack = self.describe(&client, name)?;
        Ok(stack_outputs_of(&stack))
    }

    fn list_stacks(&self, statuses: &[String]) -> Result<Vec<StackSummary>, CloudError> {
        let client = self.stack_client(None)?;
        let filter: Vec<_> = statuses
            .iter()
            .map(|status| aws_sdk_cloudformation::types::StackStatus::from(status.as_str()))
            .collect();

        let mut summaries = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let output = self
                .block_on(
                    client
                        .list_stacks()
                        .set_next_token(next_token.take())
                        .set_stack_status_filter((!filter.is_empty()).then(|| filter.clone()))
                        .send(),
                )?
                .map_err(|error| api_error("ListStacks", &error))?;

            summaries.extend(output.stack_summaries().iter().map(|summary| StackSummary {
                name: summary.stack_name().text(),
                status: summary.stack_status().text(),
                reason: summary.stack_status_reason().optional_text(),
            }));

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(summaries)
    }

    fn describe_stack(&self, name: &str) -> Result<StackDetail, CloudError> {
        let client = self.stack_client(None)?;
        self.describe(&client, name).map(|stack| stack_detail(&stack))
    }

    fn stack_resources(&self, name: &str) -> Result<Vec<StackResource>, CloudError> {
        let client = self.stack_client(None)?;
        let output = self
            .block_on(client.describe_stack_resources().stack_name(name).send())?
            .map_err(|error| stack_error("DescribeStackResources", name, &error))?;
        Ok(output
            .stack_resources()
            .iter()
            .map(|resource| StackResource {
                logical_id: resource.logical_resource_id().text(),
                physical_id: resource.physical_resource_id().optional_text(),
                kind: resource.resource_type().text(),
                status: resource.resource_status().text(),
                reason: resource.resource_status_reason().optional_text(),
            })
            .collect())
    }
}

impl ObjectStore for AwsBackend {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, CloudError> {
        let connection = self.connection()?;
        let response = connection
            .runtime
            .block_on(connection.objects.head_bucket().bucket(bucket).send());
        match response {
            Ok(_) => Ok(true),
            Err(error) if error.as_service_error().is_some_and(|error| error.is_not_found()) => {
                Ok(false)
            }
            Err(error) => Err(api_error("HeadBucket", &error)),
        }
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), CloudError> {
        let connection = self.connection()?;
        let location = connection
            .region
            .as_deref()
            .filter(|region| *region != "us-east-1")
            .map(|region| {
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build()
            });
        warn!(bucket, "creating bucket");
        connection
            .runtime
            .block_on(
                connection
                    .objects
                    .create_bucket()
                    .bucket(bucket)
                    .set_create_bucket_configuration(location)
                    .send(),
            )
            .map_err(|error| api_error("CreateBucket", &error))?;
        Ok(())
    }

    fn upload(&self, bucket: &str, key: &str, body: &[u8]) -> Result<String, CloudError> {
        let connection = self.connection()?;
        connection
            .runtime
            .block_on(
                connection
                    .objects
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(ByteStream::from(body.to_vec()))
                    .send(),
            )
            .map_err(|error| api_error("PutObject", &error))?;
        Ok(object_url(bucket, key))
    }
}

impl IdentityApi for AwsBackend {
    fn account_id(&self) -> Result<String, CloudError> {
        let connection = self.connection()?;
        let output = connection
            .runtime
            .block_on(connection.identity.get_caller_identity().send())
            .map_err(|error| api_error("GetCallerIdentity", &error))?;
        output
            .account()
            .optional_text()
            .ok_or(CloudError::MissingField {
                operation: "GetCallerIdentity",
                field: "Account",
            })
    }
}
