//! Node pool primitives: template lookup, rolling replace and template deletion.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::KuvError;
use crate::invoke::ActionInvoker;

/// Interval between rolling-update status checks.
pub const ROLLING_UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(10);

const STATUS_ROLLED_OUT: &str = "ROLLED_OUT";

/// Managed group of identical nodes built from one template.
#[async_trait]
pub trait NodePool: Send + Sync {
    /// Template the pool currently builds nodes from.
    async fn current_template(&self) -> Result<String, KuvError>;

    /// Replace every node with one built from `template`, allowing
    /// `per_node` for each replacement.
    async fn rolling_update(&self, template: &str, per_node: Duration) -> Result<(), KuvError>;

    async fn delete_template(&self, template: &str) -> Result<(), KuvError>;
}

/// GCE managed instance group driven through `gcloud`.
pub struct GceManagedInstanceGroup {
    invoker: Arc<dyn ActionInvoker>,
    project: String,
    zone: String,
    group: String,
    num_nodes: usize,
    poll_interval: Duration,
}

impl GceManagedInstanceGroup {
    pub fn new(
        invoker: Arc<dyn ActionInvoker>,
        project: impl Into<String>,
        zone: impl Into<String>,
        group: impl Into<String>,
        num_nodes: usize,
    ) -> Self {
        Self {
            invoker,
            project: project.into(),
            zone: zone.into(),
            group: group.into(),
            num_nodes,
            poll_interval: ROLLING_UPDATE_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn rolling_updates_args(&self, rest: &[String]) -> Vec<String> {
        let mut args = vec![
            "preview".to_string(),
            "rolling-updates".to_string(),
            format!("--project={}", self.project),
            format!("--zone={}", self.zone),
        ];
        args.extend_from_slice(rest);
        args
    }

    async fn rolling_update_status(&self, id: &str) -> Result<String, KuvError> {
        let args = self.rolling_updates_args(&[
            "describe".to_string(),
            id.to_string(),
            "--format=value(status)".to_string(),
        ]);
        let out = self.invoker.run("gcloud", &args).await?;
        Ok(out.stdout.trim().to_string())
    }
}

#[async_trait]
impl NodePool for GceManagedInstanceGroup {
    async fn current_template(&self) -> Result<String, KuvError> {
        let args = vec![
            "compute".to_string(),
            "instance-groups".to_string(),
            "managed".to_string(),
            format!("--project={}", self.project),
            "describe".to_string(),
            format!("--zone={}", self.zone),
            self.group.clone(),
            "--format=value(instanceTemplate)".to_string(),
        ];
        let out = self.invoker.run("gcloud", &args).await?;
        let template = last_path_segment(&out.stdout);
        if template.is_empty() {
            return Err(KuvError::Script(format!(
                "managed instance group {} reported no instance template",
                self.group
            )));
        }
        debug!(group = %self.group, template = %template, "Current node template");
        Ok(template)
    }

    async fn rolling_update(&self, template: &str, per_node: Duration) -> Result<(), KuvError> {
        let args = self.rolling_updates_args(&[
            "start".to_string(),
            format!("--group={}", self.group),
            format!("--template={template}"),
            format!("--instance-startup-timeout={}s", per_node.as_secs()),
            "--max-num-concurrent-instances=1".to_string(),
            "--max-num-failed-instances=0".to_string(),
            "--min-instance-update-time=0s".to_string(),
        ]);
        let out = self.invoker.run("gcloud", &args).await?;
        let id = parse_rolling_update_id(&format!("{}\n{}", out.stdout, out.stderr))
            .ok_or_else(|| {
                KuvError::Script(format!(
                    "could not find rolling update id in gcloud output {:?}",
                    out.stdout
                ))
            })?;
        info!(group = %self.group, update = %id, template = %template, "Started rolling update");

        let timeout = per_node.saturating_mul(u32::try_from(self.num_nodes).unwrap_or(u32::MAX));
        let start = Instant::now();

        loop {
            let status = self.rolling_update_status(&id).await?;
            debug!("Rolling update {} status: {}", id, status);

            match status.as_str() {
                STATUS_ROLLED_OUT => {
                    info!(update = %id, "Rolling update completed");
                    return Ok(());
                }
                "ROLLED_BACK" | "CANCELLED" | "FAILED" => {
                    return Err(KuvError::Script(format!(
                        "rolling update {id} ended with status {status}"
                    )));
                }
                _ => {}
            }

            if start.elapsed() >= timeout {
                return Err(KuvError::Timeout {
                    operation: format!("rolling update {id}"),
                    details: format!(
                        "status {status} after {}s ({}s per node, {} nodes)",
                        timeout.as_secs(),
                        per_node.as_secs(),
                        self.num_nodes
                    ),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn delete_template(&self, template: &str) -> Result<(), KuvError> {
        info!("Deleting node template {}", template);
        let args = vec![
            "compute".to_string(),
            "instance-templates".to_string(),
            format!("--project={}", self.project),
            "delete".to_string(),
            template.to_string(),
            "--quiet".to_string(),
        ];
        self.invoker.run("gcloud", &args).await?;
        Ok(())
    }
}

/// `https://.../instanceTemplates/tmpl-B` and `tmpl-B` both yield `tmpl-B`.
fn last_path_segment(raw: &str) -> String {
    raw.trim()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Extract the update id from `Started [https://.../rollingUpdates/<id>].`
pub fn parse_rolling_update_id(output: &str) -> Option<String> {
    let line = output.lines().find(|l| l.contains("rollingUpdates/"))?;
    let (_, rest) = line.split_once("rollingUpdates/")?;
    let id: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    (!id.is_empty()).then_some(id)
}
