use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};
use tracing::info;

use crate::cloud::CloudClients;
use crate::error::{EvaluateError, FunctionError};
use crate::values::ValueContext;

const INLINE_TEMPLATE: &str = "__fragment__";

/// Functions callable from parameter fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFunction {
    /// `env(name)`: process environment lookup.
    Env,
    /// `stack_output(stack, key, profile?)`: output or export of another stack.
    StackOutput,
    /// `template_url(path)`: upload a template and return its object URL.
    TemplateUrl,
    /// `account_id()`: account of the active credentials.
    AccountId,
    /// `hash(value)`: SHA-256 hex digest.
    Hash,
}

impl TemplateFunction {
    pub const ALL: [Self; 5] = [
        Self::Env,
        Self::StackOutput,
        Self::TemplateUrl,
        Self::AccountId,
        Self::Hash,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Env => "env",
            Self::StackOutput => "stack_output",
            Self::TemplateUrl => "template_url",
            Self::AccountId => "account_id",
            Self::Hash => "hash",
        }
    }

    const fn required(self) -> &'static [&'static str] {
        match self {
            Self::Env => &["name"],
            Self::StackOutput => &["stack", "key"],
            Self::TemplateUrl => &["path"],
            Self::AccountId => &[],
            Self::Hash => &["value"],
        }
    }

    const fn optional(self) -> &'static [&'static str] {
        match self {
            Self::StackOutput => &["profile"],
            Self::Env | Self::TemplateUrl | Self::AccountId | Self::Hash => &[],
        }
    }

    fn check_arguments(self, args: &HashMap<String, tera::Value>) -> Result<(), FunctionError> {
        let required = self.required();
        let optional = self.optional();
        let max = required.len() + optional.len();

        if args.len() < required.len() || args.len() > max {
            let expected = if optional.is_empty() {
                required.len().to_string()
            } else {
                format!("{} to {max}", required.len())
            };
            return Err(FunctionError::ArgumentCount {
                function: self.name(),
                expected,
                got: args.len(),
            });
        }

        let mut names: Vec<&String> = args.keys().collect();
        names.sort();
        if let Some(unknown) = names
            .into_iter()
            .find(|name| !required.contains(&name.as_str()) && !optional.contains(&name.as_str()))
        {
            return Err(FunctionError::UnexpectedArgument {
                function: self.name(),
                argument: unknown.clone(),
            });
        }

        Ok(())
    }
}

/// Provider access used when fragments are fully resolved.
#[derive(Debug, Clone)]
pub struct Resolver {
    pub clients: CloudClients,
    /// Root that `template_url` paths are relative to.
    pub template_root: PathBuf,
    pub bucket: String,
}

#[derive(Debug, Clone, Copy)]
pub enum EvaluationMode<'a> {
    /// Record `stack_output` producers; every function returns an empty string.
    Scan,
    /// Call every function for real and render twice.
    Resolve(&'a Resolver),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub rendered: Vec<u8>,
    /// Producer stacks named by `stack_output`, in first-seen order.
    pub producers: Vec<String>,
}

#[derive(Debug, Default)]
struct CallLog {
    producers: Vec<String>,
    failure: Option<FunctionError>,
}

type SharedLog = Arc<Mutex<CallLog>>;

fn with_log<T>(log: &SharedLog, apply: impl FnOnce(&mut CallLog) -> T) -> T {
    let mut guard = log.lock().unwrap_or_else(PoisonError::into_inner);
    apply(&mut guard)
}

fn string_argument(
    function: TemplateFunction,
    args: &HashMap<String, tera::Value>,
    argument: &'static str,
) -> Result<Option<String>, FunctionError> {
    match args.get(argument) {
        None => Ok(None),
        Some(tera::Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(FunctionError::NonStringArgument {
            function: function.name(),
            argument,
        }),
    }
}

fn required_argument(
    function: TemplateFunction,
    args: &HashMap<String, tera::Value>,
    argument: &'static str,
) -> Result<String, FunctionError> {
    string_argument(function, args, argument)?.ok_or(FunctionError::MissingArgument {
        function: function.name(),
        argument,
    })
}

fn call(
    function: TemplateFunction,
    args: &HashMap<String, tera::Value>,
    resolver: Option<&Resolver>,
    log: &SharedLog,
) -> Result<String, FunctionError> {
    function.check_arguments(args)?;

    let Some(resolver) = resolver else {
        if function == TemplateFunction::StackOutput {
            let stack = required_argument(function, args, "stack")?;
            with_log(log, |log| {
                if !log.producers.contains(&stack) {
                    log.producers.push(stack);
                }
            });
        }
        return Ok(String::new());
    };

    match function {
        TemplateFunction::Env => {
            let name = required_argument(function, args, "name")?;
            std::env::var(&name).map_err(|_| FunctionError::EnvNotSet { name })
        }
        TemplateFunction::StackOutput => {
            let stack = required_argument(function, args, "stack")?;
            let key = required_argument(function, args, "key")?;
            let profile = string_argument(function, args, "profile")?;
            let outputs = resolver
                .clients
                .stacks
                .stack_outputs(&stack, profile.as_deref())?;

            let output = outputs
                .into_iter()
                .find(|output| {
                    output.key == key || output.export_name.as_deref() == Some(key.as_str())
                })
                .ok_or_else(|| FunctionError::OutputNotFound {
                    stack: stack.clone(),
                    key: key.clone(),
                })?;
            info!(stack = %stack, key = %key, value = %output.value, "resolved stack output");
            Ok(output.value)
        }
        TemplateFunction::TemplateUrl => {
            let relative = required_argument(function, args, "path")?;
            let path = resolver.template_root.join(&relative);
            let body = fs::read(&path).map_err(|source| FunctionError::ReadTemplate {
                path: path.clone(),
                source,
            })?;
            let key = relative.trim_start_matches('/').replace('\\', "/");
            let location = resolver.clients.objects.upload(&resolver.bucket, &key, &body)?;
            info!(path = %path.display(), location = %location, "uploaded nested template");
            Ok(location)
        }
        TemplateFunction::AccountId => Ok(resolver.clients.identity.account_id()?),
        TemplateFunction::Hash => {
            let value = required_argument(function, args, "value")?;
            Ok(hex::encode(Sha256::digest(value.as_bytes())))
        }
    }
}

fn build_engine(
    fragment: &str,
    resolver: Option<&Resolver>,
    log: &SharedLog,
) -> Result<tera::Tera, EvaluateError> {
    let mut tera = tera::Tera::default();
    tera.add_raw_template(INLINE_TEMPLATE, fragment)
        .map_err(render_error)?;

    for function in TemplateFunction::ALL {
        let log = Arc::clone(log);
        let resolver = resolver.cloned();
        tera.register_function(
            function.name(),
            move |args: &HashMap<String, tera::Value>| match call(
                function,
                args,
                resolver.as_ref(),
                &log,
            ) {
                Ok(value) => Ok(tera::Value::String(value)),
                Err(error) => {
                    let message = error.to_string();
                    with_log(&log, |log| {
                        log.failure.get_or_insert(error);
                    });
                    Err(tera::Error::msg(message))
                }
            },
        );
    }

    Ok(tera)
}

fn render_error(source: tera::Error) -> EvaluateError {
    let mut current: Option<&(dyn std::error::Error + 'static)> = Some(&source);
    while let Some(error) = current {
        if let Some(tera_error) = error.downcast_ref::<tera::Error>() {
            if let tera::ErrorKind::FunctionNotFound(name) = &tera_error.kind {
                return EvaluateError::UnknownFunction { name: name.clone() };
            }
        }
        current = error.source();
    }

    EvaluateError::Render { source }
}

fn render_pass(
    fragment: &str,
    context: &tera::Context,
    resolver: Option<&Resolver>,
    log: &SharedLog,
) -> Result<String, EvaluateError> {
    let tera = build_engine(fragment, resolver, log)?;
    tera.render(INLINE_TEMPLATE, context).map_err(|error| {
        match with_log(log, |log| log.failure.take()) {
            Some(failure) => EvaluateError::Function(failure),
            None => render_error(error),
        }
    })
}

/// Evaluate a fragment against `context`.
///
/// Scan mode renders once without touching any provider. Resolve mode renders
/// the fragment, then renders the result again so values returned by
/// functions may themselves contain expressions.
///
/// # Errors
///
/// Returns an error for invalid syntax, unknown functions, bad arguments or a
/// failing function call.
pub fn evaluate(
    fragment: &str,
    context: &ValueContext,
    mode: EvaluationMode<'_>,
) -> Result<Evaluation, EvaluateError> {
    let mut tera_context = tera::Context::new();
    for (key, value) in context.values() {
        tera_context.insert(key, value);
    }

    let log = SharedLog::default();
    let rendered = match mode {
        EvaluationMode::Scan => render_pass(fragment, &tera_context, None, &log)?,
        EvaluationMode::Resolve(resolver) => {
            let first = render_pass(fragment, &tera_context, Some(resolver), &log)?;
            render_pass(&first, &tera_context, Some(resolver), &log)?
        }
    };

    let log = with_log(&log, std::mem::take);
    Ok(Evaluation {
        rendered: rendered.into_bytes(),
        producers: log.producers,
    })
}

/// Producer stacks referenced by `fragment`, without side effects.
///
/// # Errors
///
/// Returns an error when the fragment cannot be evaluated.
pub fn scan_dependencies(
    fragment: &str,
    context: &ValueContext,
) -> Result<Vec<String>, EvaluateError> {
    evaluate(fragment, context, EvaluationMode::Scan).map(|evaluation| evaluation.producers)
}

/// Fully resolve `fragment`.
///
/// # Errors
///
/// Returns an error when the fragment cannot be evaluated.
pub fn resolve(
    fragment: &str,
    context: &ValueContext,
    resolver: &Resolver,
) -> Result<Evaluation, EvaluateError> {
    evaluate(fragment, context, EvaluationMode::Resolve(resolver))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::fs;

    use super::{EvaluationMode, Resolver, evaluate, resolve, scan_dependencies};
    use crate::error::{EvaluateError, FunctionError};
    use crate::fake_cloud::FakeCloud;
    use crate::values::ValueContext;

    fn resolver(cloud: &std::sync::Arc<FakeCloud>, root: &std::path::Path) -> Resolver {
        Resolver {
            clients: cloud.clients(),
            template_root: root.to_path_buf(),
            bucket: "artifacts".to_string(),
        }
    }

    #[test]
    fn scan_records_producers_without_provider_calls() {
        let context: ValueContext = [("Env", "prod")].into_iter().collect();
        let fragment = concat!(
            "VpcId: {{ stack_output(stack=\"network\", key=\"VpcId\") }}\n",
            "Nested: {{ template_url(path=\"nested/db.yaml\") }}\n",
            "Account: {{ account_id() }}\n",
            "Db: {{ stack_output(stack=\"database\", key=\"Endpoint\", profile=\"ops\") }}\n",
            "Again: {{ stack_output(stack=\"network\", key=\"SubnetId\") }}\n",
            "Env: {{ Env }}\n",
        );

        let cloud = FakeCloud::new();
        let evaluation = evaluate(fragment, &context, EvaluationMode::Scan).expect("scan");
        assert_eq!(evaluation.producers, vec!["network", "database"]);
        assert!(cloud.calls().is_empty());

        let rendered = String::from_utf8(evaluation.rendered).expect("utf8");
        assert!(rendered.contains("VpcId: \n"));
        assert!(rendered.contains("Env: prod"));
    }

    #[test]
    fn scan_still_reports_syntax_errors() {
        let error = scan_dependencies("Key: {{ unclosed", &ValueContext::new())
            .expect_err("must fail");
        assert!(matches!(error, EvaluateError::Render { .. }));
    }

    #[test]
    fn unknown_function_is_named() {
        let error = scan_dependencies("Key: {{ lookup(name=\"x\") }}", &ValueContext::new())
            .expect_err("must fail");
        assert!(matches!(error, EvaluateError::UnknownFunction { name } if name == "lookup"));
    }

    #[test]
    fn argument_count_is_checked_in_scan_mode() {
        let error = scan_dependencies(
            "Key: {{ stack_output(stack=\"network\") }}",
            &ValueContext::new(),
        )
        .expect_err("must fail");
        assert!(matches!(
            error,
            EvaluateError::Function(FunctionError::ArgumentCount { got: 1, .. })
        ));

        let error = scan_dependencies(
            "Key: {{ hash(value=\"a\", salt=\"b\") }}",
            &ValueContext::new(),
        )
        .expect_err("must fail");
        assert!(matches!(
            error,
            EvaluateError::Function(FunctionError::ArgumentCount { got: 2, .. })
        ));
    }

    #[test]
    fn unexpected_argument_name_is_rejected() {
        let error = scan_dependencies(
            "Key: {{ stack_output(stack=\"network\", output=\"VpcId\") }}",
            &ValueContext::new(),
        )
        .expect_err("must fail");
        assert!(matches!(
            error,
            EvaluateError::Function(FunctionError::UnexpectedArgument { argument, .. })
                if argument == "output"
        ));
    }

    #[test]
    fn resolve_looks_up_outputs_by_key_or_export_name() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cloud = FakeCloud::new();
        cloud.with_stack("network", &[("VpcId", "vpc-123")]);

        let evaluation = resolve(
            concat!(
                "A: {{ stack_output(stack=\"network\", key=\"VpcId\") }}\n",
                "B: {{ stack_output(stack=\"network\", key=\"network-VpcId\") }}\n",
            ),
            &ValueContext::new(),
            &resolver(&cloud, temp.path()),
        )
        .expect("resolve");

        let rendered = String::from_utf8(evaluation.rendered).expect("utf8");
        assert_eq!(rendered, "A: vpc-123\nB: vpc-123\n");
    }

    #[test]
    fn missing_output_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cloud = FakeCloud::new();
        cloud.with_stack("network", &[("VpcId", "vpc-123")]);

        let error = resolve(
            "A: {{ stack_output(stack=\"network\", key=\"Nope\") }}",
            &ValueContext::new(),
            &resolver(&cloud, temp.path()),
        )
        .expect_err("must fail");
        assert_eq!(error.to_string(), "there is no output key Nope in stack network");
    }

    #[test]
    fn resolve_renders_function_results_a_second_time() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cloud = FakeCloud::new();
        cloud.with_stack("config", &[("Pattern", "{{ Env }}-bucket")]);
        let context: ValueContext = [("Env", "staging")].into_iter().collect();

        let evaluation = resolve(
            "Bucket: {{ stack_output(stack=\"config\", key=\"Pattern\") }}",
            &context,
            &resolver(&cloud, temp.path()),
        )
        .expect("resolve");
        assert_eq!(evaluation.rendered, b"Bucket: staging-bucket");
    }

    #[test]
    fn template_url_uploads_relative_to_template_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("nested")).expect("mkdir");
        fs::write(temp.path().join("nested/db.yaml"), "Resources: {}\n").expect("write");
        let cloud = FakeCloud::new();

        let evaluation = resolve(
            "Url: {{ template_url(path=\"nested/db.yaml\") }}",
            &ValueContext::new(),
            &resolver(&cloud, temp.path()),
        )
        .expect("resolve");

        assert_eq!(
            evaluation.rendered,
            b"Url: https://artifacts.s3.amazonaws.com/nested/db.yaml"
        );
        assert_eq!(
            cloud.state().objects.get("artifacts/nested/db.yaml"),
            Some(&b"Resources: {}\n".to_vec())
        );
    }

    #[test]
    fn env_hash_and_account_resolve() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cloud = FakeCloud::new();
        let path = std::env::var("PATH").expect("PATH should be set");

        let evaluation = resolve(
            concat!(
                "Path: {{ env(name=\"PATH\") }}\n",
                "Hash: {{ hash(value=\"abc\") }}\n",
                "Account: {{ account_id() }}",
            ),
            &ValueContext::new(),
            &resolver(&cloud, temp.path()),
        )
        .expect("resolve");

        let rendered = String::from_utf8(evaluation.rendered).expect("utf8");
        assert!(rendered.contains(&format!("Path: {path}\n")));
        assert!(rendered.contains(
            "Hash: ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad\n"
        ));
        assert!(rendered.ends_with("Account: 123456789012"));
    }

    #[test]
    fn unset_env_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cloud = FakeCloud::new();
        let error = resolve(
            "X: {{ env(name=\"STACKLINE_TEST_SURELY_UNSET\") }}",
            &ValueContext::new(),
            &resolver(&cloud, temp.path()),
        )
        .expect_err("must fail");
        assert!(matches!(
            error,
            EvaluateError::Function(FunctionError::EnvNotSet { name })
                if name == "STACKLINE_TEST_SURELY_UNSET"
        ));
    }
}
