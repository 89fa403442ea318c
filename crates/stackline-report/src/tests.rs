#![allow(clippy::expect_used)]

use std::collections::BTreeSet;
use std::path::PathBuf;

use std::collections::BTreeMap;

use stackline_domain::{
    DeployReport, LifecycleOutcome, RunMode, StackDetail, StackLookup, StackOutput, StackResource,
    StackResources, StackResult, StackSummary, UploadedObject, ValidatedTemplate, VaultAction,
};

use super::{
    ColorChoice, OutputFormat, RenderOptions, redact_sensitive, render_deploy,
    render_stack_details, render_stack_list, render_stack_resources, render_uploads,
    render_validated, render_vault,
};

const PLAIN: RenderOptions = RenderOptions {
    color: ColorChoice::Never,
    verbose: false,
};

fn result(stack: &str, outcome: LifecycleOutcome, parameters: &[(&str, &str)]) -> StackResult {
    let mut result = StackResult::new(stack, outcome);
    result.parameters = parameters
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    result
}

fn report(mode: RunMode, results: Vec<StackResult>) -> DeployReport {
    let mut report = DeployReport::new(PathBuf::from("/work/stacks.yaml"), mode);
    report.order = results.iter().map(|result| result.stack.clone()).collect();
    report.results = results;
    report
}

#[test]
fn redact_longest_value_first() {
    let sensitive = BTreeSet::from(["hunter".to_string(), "hunter2".to_string()]);
    assert_eq!(
        redact_sensitive("password=hunter2", &sensitive),
        "password=[REDACTED]"
    );
}

#[test]
fn redact_short_value_skipped() {
    let sensitive = BTreeSet::from(["ab".to_string(), "x".to_string()]);
    let input = "ab and x remain";
    assert_eq!(redact_sensitive(input, &sensitive), input);
}

#[test]
fn deploy_text_lists_outcomes_and_tally() {
    let mut created = result("network", LifecycleOutcome::Created, &[]);
    created.status = Some("CREATE_COMPLETE".to_string());
    let failed = StackResult::failed("app", "stack app failed to create".to_string());
    let mut report = report(RunMode::Deploy, vec![created, failed]);
    report
        .errors
        .push("run aborted after first failure (0 stack(s) not attempted)".to_string());

    let text = render_deploy(&report, OutputFormat::Text, &PLAIN).expect("render");

    assert!(text.starts_with("deploy /work/stacks.yaml\n"));
    assert!(text.contains("  + created           network CREATE_COMPLETE\n"));
    assert!(text.contains("  ! failed            app\n"));
    assert!(text.contains("      stack app failed to create\n"));
    assert!(text.contains("  error: run aborted after first failure"));
    assert!(text.ends_with("Deployed: 1 created, 1 failed\n"));
}

#[test]
fn verbose_text_lists_parameters() {
    let report = report(
        RunMode::DryRun,
        vec![result("network", LifecycleOutcome::Validated, &[("Cidr", "10.0.0.0/16")])],
    );
    let options = RenderOptions {
        verbose: true,
        ..PLAIN
    };

    let text = render_deploy(&report, OutputFormat::Text, &options).expect("render");

    assert!(text.starts_with("dry-run "));
    assert!(text.contains("      Cidr = 10.0.0.0/16\n"));
    assert!(text.ends_with("Checked: 1 validated\n"));
}

#[test]
fn empty_report_has_nothing_to_do() {
    let mut report = report(RunMode::Delete, Vec::new());
    report.warnings.push("no stacks match the selection".to_string());

    let text = render_deploy(&report, OutputFormat::Text, &PLAIN).expect("render");

    assert!(text.contains("Nothing to do."));
    assert!(text.contains("warn: no stacks match the selection"));
}

#[test]
fn params_only_text_prints_yaml_per_stack() {
    let report = report(
        RunMode::ParamsOnly,
        vec![
            result("network", LifecycleOutcome::Resolved, &[("Env", "staging")]),
            result("app", LifecycleOutcome::Resolved, &[("A", "1"), ("B", "two")]),
        ],
    );

    let text = render_deploy(&report, OutputFormat::Text, &PLAIN).expect("render");

    assert_eq!(text, "# network\nEnv: staging\n# app\nA: '1'\nB: two\n");
}

#[test]
fn params_only_json_uses_parameter_pairs() {
    let report = report(
        RunMode::ParamsOnly,
        vec![result("network", LifecycleOutcome::Resolved, &[("Env", "staging")])],
    );

    let json = render_deploy(&report, OutputFormat::Json, &PLAIN).expect("render");
    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");

    assert_eq!(
        value,
        serde_json::json!([{
            "stack": "network",
            "parameters": [{"ParameterKey": "Env", "ParameterValue": "staging"}]
        }])
    );
}

#[test]
fn deploy_json_round_trips_report() {
    let report = report(
        RunMode::Deploy,
        vec![result("network", LifecycleOutcome::NoUpdateNeeded, &[])],
    );

    let json = render_deploy(&report, OutputFormat::Json, &PLAIN).expect("render");
    let parsed: DeployReport = serde_json::from_str(&json).expect("valid report");

    assert_eq!(parsed, report);
    assert!(json.contains("\"no_update_needed\""));
}

#[test]
fn upload_and_validate_text() {
    let uploaded = vec![UploadedObject {
        path: PathBuf::from("templates/vpc.yaml"),
        key: "v1/templates/vpc.yaml".to_string(),
        location: "https://artifacts.s3.amazonaws.com/v1/templates/vpc.yaml".to_string(),
    }];
    let text = render_uploads(&uploaded, OutputFormat::Text, &PLAIN).expect("render");
    assert!(text.contains(
        "templates/vpc.yaml https://artifacts.s3.amazonaws.com/v1/templates/vpc.yaml"
    ));
    assert!(text.ends_with("Uploaded: 1 object\n"));

    let validated = vec![
        ValidatedTemplate {
            target: "vpc.yaml".to_string(),
            capabilities: vec!["CAPABILITY_IAM".to_string()],
        },
        ValidatedTemplate {
            target: "db.yaml".to_string(),
            capabilities: Vec::new(),
        },
    ];
    let text = render_validated(&validated, OutputFormat::Text, &PLAIN).expect("render");
    assert!(text.contains("vpc.yaml CAPABILITY_IAM\n"));
    assert!(text.ends_with("Validated: 2 templates\n"));
}

#[test]
fn vault_json_names_action() {
    let files = vec![PathBuf::from("env/prod/secrets.yaml")];
    let json = render_vault(VaultAction::Encrypt, &files, OutputFormat::Json, &PLAIN)
        .expect("render");
    let value: serde_json::Value = serde_json::from_str(&json).expect("valid json");
    assert_eq!(
        value,
        serde_json::json!({"action": "encrypt", "files": ["env/prod/secrets.yaml"]})
    );

    let text = render_vault(VaultAction::Decrypt, &files, OutputFormat::Text, &PLAIN)
        .expect("render");
    assert!(text.contains("decrypted"));
}

#[test]
fn stack_list_aligns_names() {
    let summaries = vec![
        StackSummary {
            name: "app".to_string(),
            status: "UPDATE_COMPLETE".to_string(),
            reason: None,
        },
        StackSummary {
            name: "network".to_string(),
            status: "ROLLBACK_COMPLETE".to_string(),
            reason: Some("Resource creation cancelled".to_string()),
        },
    ];

    let text = render_stack_list(&summaries, OutputFormat::Text, &PLAIN).expect("render");

    assert!(text.starts_with("stacks\n"));
    assert!(text.contains("  app      UPDATE_COMPLETE\n"));
    assert!(text.contains("  network  ROLLBACK_COMPLETE Resource creation cancelled\n"));
    assert!(text.ends_with("Listed: 2 stacks\n"));

    let json = render_stack_list(&summaries, OutputFormat::Json, &PLAIN).expect("render");
    let parsed: serde_json::Value = serde_json::from_str(&json).expect("json");
    assert_eq!(parsed[1]["status"], "ROLLBACK_COMPLETE");
}

#[test]
fn stack_details_show_outputs_and_missing_stacks() {
    let lookup = StackLookup {
        found: vec![StackDetail {
            name: "network".to_string(),
            status: "CREATE_COMPLETE".to_string(),
            reason: None,
            description: Some("Shared VPC".to_string()),
            parameters: BTreeMap::from([("Cidr".to_string(), "10.0.0.0/16".to_string())]),
            outputs: vec![StackOutput {
                key: "VpcId".to_string(),
                value: "vpc-1".to_string(),
                export_name: Some("network-VpcId".to_string()),
            }],
            tags: BTreeMap::new(),
        }],
        missing: vec!["app".to_string()],
    };

    let text = render_stack_details(&lookup, OutputFormat::Text, &PLAIN).expect("render");

    assert!(text.starts_with("stack network\n"));
    assert!(text.contains("  status       CREATE_COMPLETE\n"));
    assert!(text.contains("  description  Shared VPC\n"));
    assert!(text.contains("    Cidr = 10.0.0.0/16\n"));
    assert!(text.contains("    VpcId = vpc-1 (export network-VpcId)\n"));
    assert!(!text.contains("  tags"));
    assert!(text.ends_with("  warn: stack app is not deployed\n"));

    let json = render_stack_details(&lookup, OutputFormat::Json, &PLAIN).expect("render");
    let parsed: serde_json::Value = serde_json::from_str(&json).expect("json");
    assert_eq!(parsed["found"][0]["outputs"][0]["value"], "vpc-1");
    assert_eq!(parsed["missing"][0], "app");
}

#[test]
fn stack_resources_list_physical_ids() {
    let lookup = StackLookup {
        found: vec![
            StackResources {
                stack: "network".to_string(),
                resources: vec![StackResource {
                    logical_id: "Vpc".to_string(),
                    physical_id: Some("vpc-1".to_string()),
                    kind: "AWS::EC2::VPC".to_string(),
                    status: "CREATE_COMPLETE".to_string(),
                    reason: None,
                }],
            },
            StackResources {
                stack: "empty".to_string(),
                resources: Vec::new(),
            },
        ],
        missing: Vec::new(),
    };

    let text = render_stack_resources(&lookup, OutputFormat::Text, &PLAIN).expect("render");

    assert!(text.starts_with("resources network\n"));
    assert!(text.contains("  Vpc AWS::EC2::VPC vpc-1 CREATE_COMPLETE\n"));
    assert!(text.contains("resources empty\n  No resources.\n"));
    assert!(!text.contains("warn:"));
}
