//! In-memory provider used by unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stackline_domain::{OperationKind, StackDetail, StackResource, StackSummary};

use crate::cloud::{
    CloudClients, IdentityApi, ObjectStore, StackApi, StackOutput,
    StackRequest, StackStatus, TemplateSource, object_url,
};
use crate::error::CloudError;

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub calls: Vec<String>,
    pub stacks: BTreeMap<String, StackRequest>,
    pub outputs: BTreeMap<String, Vec<StackOutput>>,
    pub buckets: BTreeSet<String>,
    pub objects: BTreeMap<String, Vec<u8>>,
    /// Stacks whose next update is rejected with the no-update message.
    pub unchanged: BTreeSet<String>,
    /// Terminal status reported for a stack instead of the success status.
    pub final_status: BTreeMap<String, String>,
    /// Templates (by body or URL) rejected by validation.
    pub invalid_templates: BTreeSet<String>,
    /// Stacks whose create or update is rejected with a provider message.
    pub rejected: BTreeMap<String, String>,
    pub resources: BTreeMap<String, Vec<StackResource>>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeCloud {
    state: Mutex<FakeState>,
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn clients(self: &Arc<Self>) -> CloudClients {
        CloudClients::from_backend(Arc::clone(self))
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn with_stack(&self, name: &str, outputs: &[(&str, &str)]) {
        let mut state = self.state();
        state.stacks.insert(
            name.to_string(),
            StackRequest {
                name: name.to_string(),
                template: TemplateSource::Body(String::new()),
                parameters: BTreeMap::new(),
                tags: BTreeMap::new(),
                capabilities: Vec::new(),
            },
        );
        state.outputs.insert(
            name.to_string(),
            outputs
                .iter()
                .map(|(key, value)| StackOutput {
                    key: (*key).to_string(),
                    value: (*value).to_string(),
                    export_name: Some(format!("{name}-{key}")),
                })
                .collect(),
        );
    }

    fn record(&self, call: String) -> MutexGuard<'_, FakeState> {
        let mut state = self.state();
        state.calls.push(call);
        state
    }
}

fn template_key(source: &TemplateSource) -> &str {
    match source {
        TemplateSource::Body(body) => body,
        TemplateSource::Url(url) => url,
    }
}

impl StackApi for FakeCloud {
    fn validate_template(&self, source: &TemplateSource) -> Result<Vec<String>, CloudError> {
        let state = self.record("validate".to_string());
        if state.invalid_templates.contains(template_key(source)) {
            return Err(CloudError::Provider {
                message: "Template format error: unsupported structure.".to_string(),
            });
        }
        Ok(vec!["CAPABILITY_IAM".to_string()])
    }

    fn stack_exists(&self, name: &str) -> Result<bool, CloudError> {
        let state = self.record(format!("exists {name}"));
        Ok(state.stacks.contains_key(name))
    }

    fn create_stack(&self, request: &StackRequest) -> Result<String, CloudError> {
        let mut state = self.record(format!("create {}", request.name));
        if let Some(message) = state.rejected.get(&request.name) {
            return Err(CloudError::Provider {
                message: message.clone(),
            });
        }
        state.stacks.insert(request.name.clone(), request.clone());
        Ok(format!("arn:fake:{}", request.name))
    }

    fn update_stack(&self, request: &StackRequest) -> Result<String, CloudError> {
        let mut state = self.record(format!("update {}", request.name));
        if state.unchanged.contains(&request.name) {
            return Err(CloudError::NoUpdates {
                stack: request.name.clone(),
            });
        }
        if let Some(message) = state.rejected.get(&request.name) {
            return Err(CloudError::Provider {
                message: message.clone(),
            });
        }
        state.stacks.insert(request.name.clone(), request.clone());
        Ok(format!("arn:fake:{}", request.name))
    }

    fn delete_stack(&self, name: &str) -> Result<(), CloudError> {
        let mut state = self.record(format!("delete {name}"));
        state.stacks.remove(name);
        state.outputs.remove(name);
        Ok(())
    }

    fn wait_for_stack(&self, name: &str, kind: OperationKind) -> Result<StackStatus, CloudError> {
        let state = self.record(format!("wait {name} {kind}"));
        let status = state
            .final_status
            .get(name)
            .cloned()
            .unwrap_or_else(|| kind.success_status().to_string());
        Ok(StackStatus(status))
    }

    fn stack_outputs(
        &self,
        name: &str,
        _profile: Option<&str>,
    ) -> Result<Vec<StackOutput>, CloudError> {
        let state = self.record(format!("outputs {name}"));
        state
            .outputs
            .get(name)
            .cloned()
            .ok_or_else(|| CloudError::StackNotFound {
                name: name.to_string(),
            })
    }

    fn list_stacks(&self, statuses: &[String]) -> Result<Vec<StackSummary>, CloudError> {
        let state = self.record("list".to_string());
        Ok(state
            .stacks
            .keys()
            .map(|name| StackSummary {
                name: name.clone(),
                status: fake_status(&state, name),
                reason: None,
            })
            .filter(|summary| statuses.is_empty() || statuses.contains(&summary.status))
            .collect())
    }

    fn describe_stack(&self, name: &str) -> Result<StackDetail, CloudError> {
        let state = self.record(format!("describe {name}"));
        let request = state
            .stacks
            .get(name)
            .ok_or_else(|| CloudError::StackNotFound {
                name: name.to_string(),
            })?;
        Ok(StackDetail {
            name: name.to_string(),
            status: fake_status(&state, name),
            reason: None,
            description: None,
            parameters: request.parameters.clone(),
            outputs: state.outputs.get(name).cloned().unwrap_or_default(),
            tags: request.tags.clone(),
        })
    }

    fn stack_resources(&self, name: &str) -> Result<Vec<StackResource>, CloudError> {
        let state = self.record(format!("resources {name}"));
        if !state.stacks.contains_key(name) {
            return Err(CloudError::StackNotFound {
                name: name.to_string(),
            });
        }
        Ok(state.resources.get(name).cloned().unwrap_or_default())
    }
}

fn fake_status(state: &FakeState, name: &str) -> String {
    state
        .final_status
        .get(name)
        .cloned()
        .unwrap_or_else(|| OperationKind::Create.success_status().to_string())
}

impl ObjectStore for FakeCloud {
    fn bucket_exists(&self, bucket: &str) -> Result<bool, CloudError> {
        let state = self.record(format!("bucket-exists {bucket}"));
        Ok(state.buckets.contains(bucket))
    }

    fn create_bucket(&self, bucket: &str) -> Result<(), CloudError> {
        let mut state = self.record(format!("create-bucket {bucket}"));
        state.buckets.insert(bucket.to_string());
        Ok(())
    }

    fn upload(&self, bucket: &str, key: &str, body: &[u8]) -> Result<String, CloudError> {
        let mut state = self.record(format!("upload {bucket}/{key}"));
        state.objects.insert(format!("{bucket}/{key}"), body.to_vec());
        Ok(object_url(bucket, key))
    }
}

impl IdentityApi for FakeCloud {
    fn account_id(&self) -> Result<String, CloudError> {
        drop(self.record("account-id".to_string()));
        Ok("123456789012".to_string())
    }
}
