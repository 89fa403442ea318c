use std::path::Path;

use stackline_domain::{
    StackDetail, StackFilter, StackLookup, StackResources, StackSummary,
};
use tracing::{info, warn};

use crate::cloud::StackApi;
use crate::error::{CloudError, PipelineError};
use crate::manifest::load_manifest;

/// Status values accepted by the list filter.
pub const STACK_STATUSES: [&str; 17] = [
    "CREATE_COMPLETE",
    "CREATE_FAILED",
    "CREATE_IN_PROGRESS",
    "DELETE_COMPLETE",
    "DELETE_FAILED",
    "DELETE_IN_PROGRESS",
    "REVIEW_IN_PROGRESS",
    "ROLLBACK_COMPLETE",
    "ROLLBACK_FAILED",
    "ROLLBACK_IN_PROGRESS",
    "UPDATE_COMPLETE",
    "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
    "UPDATE_IN_PROGRESS",
    "UPDATE_ROLLBACK_COMPLETE",
    "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
    "UPDATE_ROLLBACK_FAILED",
    "UPDATE_ROLLBACK_IN_PROGRESS",
];

/// Parse a comma separated status filter. Case is ignored.
///
/// # Errors
///
/// Returns [`PipelineError::UnknownStatus`] for a value outside
/// [`STACK_STATUSES`].
pub fn parse_status_filter(input: &str) -> Result<Vec<String>, PipelineError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|status| !status.is_empty())
        .map(|status| {
            let status = status.to_ascii_uppercase();
            if STACK_STATUSES.contains(&status.as_str()) {
                Ok(status)
            } else {
                Err(PipelineError::UnknownStatus { status })
            }
        })
        .collect()
}

/// Every stack of the account, optionally restricted to `statuses`.
///
/// # Errors
///
/// Returns the provider error when the listing fails.
pub fn list_stacks(
    stacks: &dyn StackApi,
    statuses: &[String],
) -> Result<Vec<StackSummary>, PipelineError> {
    let mut summaries = stacks.list_stacks(statuses)?;
    summaries.sort_by(|left, right| left.name.cmp(&right.name));
    info!(count = summaries.len(), "listed stacks");
    Ok(summaries)
}

fn lookup<T>(
    manifest: &Path,
    filter: &StackFilter,
    fetch: impl Fn(&str) -> Result<T, CloudError>,
) -> Result<StackLookup<T>, PipelineError> {
    let manifest = load_manifest(manifest)?;
    let selected = manifest.select(filter);
    if selected.is_empty() {
        return Err(PipelineError::NoStackFound);
    }

    let mut lookup = StackLookup::default();
    for stack in selected {
        match fetch(stack.name.as_str()) {
            Ok(found) => lookup.found.push(found),
            Err(CloudError::StackNotFound { name }) => {
                warn!(stack = %name, "stack is not deployed");
                lookup.missing.push(name);
            }
            Err(error) => return Err(error.into()),
        }
    }
    Ok(lookup)
}

/// Describe the deployed state of every selected manifest stack.
///
/// # Errors
///
/// Returns an error when the manifest cannot be loaded, nothing is
/// selected, or the provider fails for a reason other than a missing stack.
pub fn describe_selected(
    manifest: &Path,
    filter: &StackFilter,
    stacks: &dyn StackApi,
) -> Result<StackLookup<StackDetail>, PipelineError> {
    lookup(manifest, filter, |name| stacks.describe_stack(name))
}

/// Resources of every selected manifest stack.
///
/// # Errors
///
/// Same as [`describe_selected`].
pub fn resources_of_selected(
    manifest: &Path,
    filter: &StackFilter,
    stacks: &dyn StackApi,
) -> Result<StackLookup<StackResources>, PipelineError> {
    lookup(manifest, filter, |name| {
        Ok(StackResources {
            stack: name.to_string(),
            resources: stacks.stack_resources(name)?,
        })
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use std::fs;
    use std::path::Path;

    use stackline_domain::{StackFilter, StackResource};

    use super::{describe_selected, list_stacks, parse_status_filter, resources_of_selected};
    use crate::error::PipelineError;
    use crate::fake_cloud::FakeCloud;

    fn project(root: &Path) {
        fs::write(
            root.join("stacks.yaml"),
            concat!(
                "s3Bucket: artifacts\n",
                "stacks:\n",
                "  - name: network\n    tpl: network.yaml\n    tags:\n      tier: core\n",
                "  - name: app\n    tpl: app.yaml\n    tags:\n      tier: web\n",
            ),
        )
        .expect("write");
    }

    #[test]
    fn status_filter_is_normalised_and_checked() {
        assert_eq!(
            parse_status_filter("create_complete, UPDATE_COMPLETE,").expect("parse"),
            vec!["CREATE_COMPLETE", "UPDATE_COMPLETE"]
        );
        assert!(parse_status_filter("").expect("parse").is_empty());
        assert!(matches!(
            parse_status_filter("DONE").expect_err("must fail"),
            PipelineError::UnknownStatus { status } if status == "DONE"
        ));
    }

    #[test]
    fn listing_is_sorted_and_filtered() {
        let cloud = FakeCloud::new();
        cloud.with_stack("zeta", &[]);
        cloud.with_stack("alpha", &[]);
        cloud
            .state()
            .final_status
            .insert("zeta".to_string(), "ROLLBACK_COMPLETE".to_string());

        let all = list_stacks(&*cloud, &[]).expect("list");
        let names: Vec<_> = all.iter().map(|summary| summary.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        let failed =
            list_stacks(&*cloud, &["ROLLBACK_COMPLETE".to_string()]).expect("list");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "zeta");
    }

    #[test]
    fn undeployed_stacks_are_reported_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        project(temp.path());
        let cloud = FakeCloud::new();
        cloud.with_stack("network", &[("VpcId", "vpc-1")]);

        let lookup = describe_selected(
            &temp.path().join("stacks.yaml"),
            &StackFilter::default(),
            &*cloud,
        )
        .expect("describe");

        assert_eq!(lookup.found.len(), 1);
        assert_eq!(lookup.found[0].name, "network");
        assert_eq!(lookup.found[0].outputs[0].value, "vpc-1");
        assert_eq!(lookup.missing, vec!["app"]);
    }

    #[test]
    fn resources_follow_the_selection() {
        let temp = tempfile::tempdir().expect("tempdir");
        project(temp.path());
        let cloud = FakeCloud::new();
        cloud.with_stack("network", &[]);
        cloud.with_stack("app", &[]);
        cloud.state().resources.insert(
            "network".to_string(),
            vec![StackResource {
                logical_id: "Vpc".to_string(),
                physical_id: Some("vpc-1".to_string()),
                kind: "AWS::EC2::VPC".to_string(),
                status: "CREATE_COMPLETE".to_string(),
                reason: None,
            }],
        );

        let filter = StackFilter::parse(None, Some("tier=core")).expect("filter");
        let lookup = resources_of_selected(&temp.path().join("stacks.yaml"), &filter, &*cloud)
            .expect("resources");

        assert_eq!(lookup.found.len(), 1);
        assert_eq!(lookup.found[0].stack, "network");
        assert_eq!(lookup.found[0].resources[0].logical_id, "Vpc");
        assert!(lookup.missing.is_empty());
        assert!(!cloud.calls().contains(&"resources app".to_string()));
    }

    #[test]
    fn empty_selection_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        project(temp.path());
        let cloud = FakeCloud::new();
        let filter = StackFilter::parse(Some("unknown"), None).expect("filter");

        let error = describe_selected(&temp.path().join("stacks.yaml"), &filter, &*cloud)
            .expect_err("must fail");
        assert!(matches!(error, PipelineError::NoStackFound));
        assert!(cloud.calls().is_empty());
    }
}
