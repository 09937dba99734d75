//! `aws` CLI adapters: EC2 discovery, classic-ELB control plane, S3
//! artifact store.

use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, warn};

use rollfleet_core::{
    BlobStore, CloudError, CloudResult, DrainAttributes, FleetDiscovery, Instance,
    InstanceHealthState, LoadBalancer, LoadBalancerApi,
};

/// `describe-tags` accepts at most this many load balancer names per
/// call.
const TAG_BATCH: usize = 20;

/// All cloud collaborators in one struct, shelling out to the `aws`
/// CLI so the operator's credential chain and profile handling apply
/// unchanged.
#[derive(Debug, Clone)]
pub struct AwsCli {
    region: Option<String>,
    bucket: String,
}

impl AwsCli {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            region: None,
            bucket: bucket.into(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    async fn run(&self, args: &[&str]) -> CloudResult<String> {
        let mut command = Command::new("aws");
        command.args(args);
        if let Some(region) = &self.region {
            command.args(["--region", region]);
        }
        debug!(args = ?args, "aws");

        let output = command
            .output()
            .await
            .map_err(|e| CloudError::Request(format!("failed to spawn aws: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(classify_cli_error(args, &stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Map a failed CLI invocation to the error the rollout protocol
/// understands. The ELB API reports unknown members via an
/// `InvalidInstance` error code on stderr.
fn classify_cli_error(args: &[&str], stderr: &str) -> CloudError {
    if stderr.contains("InvalidInstance") {
        let lb = value_after(args, "--load-balancer-name").unwrap_or("unknown");
        let instance = value_after(args, "--instances").unwrap_or("unknown");
        return CloudError::InstanceNotRegistered {
            lb: lb.to_string(),
            instance: instance.to_string(),
        };
    }
    if stderr.contains("LoadBalancerNotFound") {
        let lb = value_after(args, "--load-balancer-name").unwrap_or("unknown");
        return CloudError::LoadBalancerNotFound(lb.to_string());
    }
    CloudError::Request(format!("aws {} failed: {}", args.join(" "), stderr.trim()))
}

fn value_after<'a>(args: &[&'a str], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| *a == flag)
        .and_then(|i| args.get(i + 1))
        .copied()
}

// ── Response shapes ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Ec2Instance {
    instance_id: String,
    private_ip_address: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeLoadBalancersResponse {
    #[serde(default)]
    load_balancer_descriptions: Vec<LoadBalancerDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoadBalancerDescription {
    load_balancer_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeTagsResponse {
    #[serde(default)]
    tag_descriptions: Vec<TagDescription>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagDescription {
    load_balancer_name: String,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeAttributesResponse {
    load_balancer_attributes: LoadBalancerAttributes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoadBalancerAttributes {
    connection_draining: Option<ConnectionDraining>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConnectionDraining {
    enabled: bool,
    #[serde(default)]
    timeout: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceHealthResponse {
    #[serde(default)]
    instance_states: Vec<InstanceState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceState {
    instance_id: String,
    state: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListObjectsResponse {
    #[serde(default)]
    contents: Vec<S3Object>,
    #[serde(default)]
    is_truncated: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct S3Object {
    key: String,
}

// ── Pure parsers ───────────────────────────────────────────────────

fn tag_map(tags: Vec<Tag>) -> HashMap<String, String> {
    tags.into_iter().map(|t| (t.key, t.value)).collect()
}

fn parse_instances(json: &str) -> CloudResult<Vec<Instance>> {
    let response: DescribeInstancesResponse =
        serde_json::from_str(json).map_err(|e| CloudError::Malformed(e.to_string()))?;
    Ok(response
        .reservations
        .into_iter()
        .flat_map(|r| r.instances)
        .filter_map(|i| {
            // Instances without a private address (mid-termination)
            // cannot be deployed to.
            let ip = i.private_ip_address?;
            Some(Instance::new(i.instance_id, ip, tag_map(i.tags)))
        })
        .collect())
}

fn parse_lb_names(json: &str) -> CloudResult<Vec<String>> {
    let response: DescribeLoadBalancersResponse =
        serde_json::from_str(json).map_err(|e| CloudError::Malformed(e.to_string()))?;
    Ok(response
        .load_balancer_descriptions
        .into_iter()
        .map(|d| d.load_balancer_name)
        .collect())
}

fn parse_lb_tags(json: &str) -> CloudResult<Vec<(String, HashMap<String, String>)>> {
    let response: DescribeTagsResponse =
        serde_json::from_str(json).map_err(|e| CloudError::Malformed(e.to_string()))?;
    Ok(response
        .tag_descriptions
        .into_iter()
        .map(|d| (d.load_balancer_name, tag_map(d.tags)))
        .collect())
}

fn parse_attributes(json: &str) -> CloudResult<DrainAttributes> {
    let response: DescribeAttributesResponse =
        serde_json::from_str(json).map_err(|e| CloudError::Malformed(e.to_string()))?;
    Ok(match response.load_balancer_attributes.connection_draining {
        Some(draining) => DrainAttributes {
            draining_enabled: draining.enabled,
            timeout_secs: draining.timeout,
        },
        None => DrainAttributes {
            draining_enabled: false,
            timeout_secs: 0,
        },
    })
}

fn parse_health(json: &str, lb: &str, instance_id: &str) -> CloudResult<InstanceHealthState> {
    let response: InstanceHealthResponse =
        serde_json::from_str(json).map_err(|e| CloudError::Malformed(e.to_string()))?;
    let state = response
        .instance_states
        .into_iter()
        .find(|s| s.instance_id == instance_id)
        .ok_or_else(|| CloudError::InstanceNotRegistered {
            lb: lb.to_string(),
            instance: instance_id.to_string(),
        })?;
    Ok(match state.state.as_str() {
        "InService" => InstanceHealthState::InService,
        "OutOfService" => InstanceHealthState::OutOfService,
        _ => InstanceHealthState::Unknown,
    })
}

fn parse_object_keys(json: &str) -> CloudResult<(Vec<String>, bool)> {
    let response: ListObjectsResponse =
        serde_json::from_str(json).map_err(|e| CloudError::Malformed(e.to_string()))?;
    Ok((
        response.contents.into_iter().map(|o| o.key).collect(),
        response.is_truncated,
    ))
}

/// Keep the load balancers whose tags say they front `app` in
/// `environment`. Draining attributes are filled in afterwards.
fn serving_from_tags(
    tagged: Vec<(String, HashMap<String, String>)>,
    app: &str,
    environment: &str,
) -> Vec<LoadBalancer> {
    tagged
        .into_iter()
        .map(|(name, tags)| LoadBalancer {
            name,
            tags,
            draining_enabled: false,
            draining_timeout_secs: 0,
        })
        .filter(|lb| lb.serves(app, environment))
        .collect()
}

/// Build prefixes for the trailing `weeks` build weeks ending at
/// `from`, newest first. Artifacts are keyed `{app}/{YYYY.WW}/...`
/// where both parts come from the ISO week date — the ISO year, not
/// the calendar year, so the first and last calendar days of a year
/// land in the week that actually holds them.
fn weekly_prefixes(app: &str, weeks: u32, from: NaiveDate) -> Vec<String> {
    (0..weeks.max(1))
        .map(|back| {
            let week = (from - ChronoDuration::weeks(i64::from(back))).iso_week();
            format!("{app}/{}.{:02}", week.year(), week.week())
        })
        .collect()
}

// ── Trait implementations ──────────────────────────────────────────

#[async_trait]
impl FleetDiscovery for AwsCli {
    async fn list_instances(&self, environment: &str) -> CloudResult<Vec<Instance>> {
        let env_filter = format!("Name=tag:Environment,Values={environment}");
        let output = self
            .run(&[
                "ec2",
                "describe-instances",
                "--filters",
                &env_filter,
                "Name=instance-state-name,Values=running",
                "--output",
                "json",
            ])
            .await?;
        parse_instances(&output)
    }

    async fn list_load_balancers(
        &self,
        app: &str,
        environment: &str,
    ) -> CloudResult<Vec<LoadBalancer>> {
        let output = self
            .run(&["elb", "describe-load-balancers", "--output", "json"])
            .await?;
        let names = parse_lb_names(&output)?;

        let mut serving = Vec::new();
        for batch in names.chunks(TAG_BATCH) {
            let mut args = vec!["elb", "describe-tags", "--load-balancer-names"];
            args.extend(batch.iter().map(String::as_str));
            args.extend(["--output", "json"]);
            let output = self.run(&args).await?;
            serving.extend(serving_from_tags(parse_lb_tags(&output)?, app, environment));
        }

        // Attributes are read only for the serving set, so an
        // unrelated load balancer disappearing mid-listing cannot
        // abort discovery.
        for lb in &mut serving {
            let attributes = self.describe_attributes(&lb.name).await?;
            lb.draining_enabled = attributes.draining_enabled;
            lb.draining_timeout_secs = attributes.timeout_secs;
        }
        Ok(serving)
    }
}

#[async_trait]
impl LoadBalancerApi for AwsCli {
    async fn deregister(&self, lb: &str, instance_id: &str) -> CloudResult<()> {
        self.run(&[
            "elb",
            "deregister-instances-from-load-balancer",
            "--load-balancer-name",
            lb,
            "--instances",
            instance_id,
            "--output",
            "json",
        ])
        .await?;
        Ok(())
    }

    async fn register(&self, lb: &str, instance_id: &str) -> CloudResult<()> {
        self.run(&[
            "elb",
            "register-instances-with-load-balancer",
            "--load-balancer-name",
            lb,
            "--instances",
            instance_id,
            "--output",
            "json",
        ])
        .await?;
        Ok(())
    }

    async fn describe_health(
        &self,
        lb: &str,
        instance_id: &str,
    ) -> CloudResult<InstanceHealthState> {
        let output = self
            .run(&[
                "elb",
                "describe-instance-health",
                "--load-balancer-name",
                lb,
                "--instances",
                instance_id,
                "--output",
                "json",
            ])
            .await?;
        parse_health(&output, lb, instance_id)
    }

    async fn describe_attributes(&self, lb: &str) -> CloudResult<DrainAttributes> {
        let output = self
            .run(&[
                "elb",
                "describe-load-balancer-attributes",
                "--load-balancer-name",
                lb,
                "--output",
                "json",
            ])
            .await?;
        parse_attributes(&output)
    }
}

#[async_trait]
impl BlobStore for AwsCli {
    async fn fetch(&self, reference: &str, dest_dir: &Path) -> CloudResult<PathBuf> {
        let name = reference
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| CloudError::ArtifactNotFound(reference.to_string()))?;
        let dest = dest_dir.join(name);
        let dest_str = dest.display().to_string();

        match self.run(&["s3", "cp", reference, &dest_str]).await {
            Ok(_) => Ok(dest),
            Err(CloudError::Request(detail)) if detail.contains("404") => {
                Err(CloudError::ArtifactNotFound(reference.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn list_recent(&self, app: &str, weeks: u32) -> CloudResult<Vec<String>> {
        let mut references = Vec::new();
        for prefix in weekly_prefixes(app, weeks, Utc::now().date_naive()) {
            let output = self
                .run(&[
                    "s3api",
                    "list-objects-v2",
                    "--bucket",
                    &self.bucket,
                    "--prefix",
                    &prefix,
                    "--output",
                    "json",
                ])
                .await?;
            let (keys, truncated) = parse_object_keys(&output)?;
            if truncated {
                warn!(%prefix, "artifact listing truncated; older builds omitted");
            }
            references.extend(
                keys.into_iter()
                    .map(|k| format!("s3://{}/{k}", self.bucket)),
            );
        }
        Ok(references)
    }
}
