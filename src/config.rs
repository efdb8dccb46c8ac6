//! CLI arguments and the immutable run configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::KuvError;
use crate::probe::DEFAULT_PROBE_TIMEOUT;
use crate::validator::{DEFAULT_POLL_INTERVAL, DEFAULT_WINDOW_BUDGET, ValidatorSettings};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Upgrade scenario to run.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioKind {
    /// Push local master binaries; runs on any provider.
    KubePush,
    /// Upgrade the master to the target version (GCE only).
    UpgradeMaster,
    /// Upgrade the master, then roll the node fleet (GCE only).
    UpgradeCluster,
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KubePush => write!(f, "kube-push"),
            Self::UpgradeMaster => write!(f, "upgrade-master"),
            Self::UpgradeCluster => write!(f, "upgrade-cluster"),
        }
    }
}

/// Validate service availability while a cluster is upgraded in place.
#[derive(Parser, Debug, Clone)]
#[command(name = "kuv")]
#[command(about = "Validate service availability during in-place Kubernetes upgrades")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    /// Scenarios to run, in order
    #[arg(
        short,
        long = "scenario",
        value_enum,
        default_values_t = [ScenarioKind::KubePush]
    )]
    pub scenarios: Vec<ScenarioKind>,

    /// Cloud provider of the cluster (gce, gke, aws, ...)
    #[arg(long, env = "KUBERNETES_PROVIDER", default_value = "gce")]
    pub provider: String,

    /// Cloud project ID (GCE)
    #[arg(long, env = "PROJECT")]
    pub project: Option<String>,

    /// Compute zone of the node instance group (GCE)
    #[arg(long, env = "ZONE")]
    pub zone: Option<String>,

    /// Managed instance group backing the nodes (GCE)
    #[arg(long, env = "NODE_INSTANCE_GROUP")]
    pub node_instance_group: Option<String>,

    /// Expected number of nodes in the cluster
    #[arg(long, env = "NUM_NODES", default_value = "3")]
    pub num_nodes: usize,

    /// Root of the repository holding the upgrade scripts
    #[arg(long, env = "REPO_ROOT", default_value = ".")]
    pub repo_root: PathBuf,

    /// Version passed to the upgrade scripts
    #[arg(long, default_value = "latest_ci")]
    pub upgrade_version: String,

    /// Namespace of the workload under test
    #[arg(short, long, default_value = "default")]
    pub namespace: String,

    /// Service exposing the workload through a load balancer
    #[arg(long, default_value = "baz")]
    pub service: String,

    /// Replica-set (replication controller) backing the service
    #[arg(long)]
    pub replica_set: String,

    /// Desired number of running and ready pods
    #[arg(long, default_value = "2")]
    pub replicas: usize,

    /// Probe this host instead of the service's load-balancer ingress
    #[arg(long)]
    pub target_host: Option<String>,

    /// Port of the externally reachable endpoint
    #[arg(long, default_value = "80")]
    pub port: u16,

    /// Per-call probe timeout in seconds
    #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT.as_secs())]
    pub probe_timeout_seconds: u64,

    /// Interval between probes within a window, in seconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL.as_secs())]
    pub poll_interval_seconds: u64,

    /// Seconds a window may go without a healthy response during an upgrade
    #[arg(long, default_value_t = DEFAULT_WINDOW_BUDGET.as_secs())]
    pub window_budget_seconds: u64,

    /// Pause between validation windows, in milliseconds
    #[arg(long, default_value = "200")]
    pub iteration_period_ms: u64,

    /// Seconds to wait for the ingress to answer during cluster validation
    #[arg(long, default_value = "120")]
    pub reachability_timeout_seconds: u64,

    /// Per-node timeout of the rolling update, in seconds
    #[arg(long, default_value = "300")]
    pub per_node_timeout_seconds: u64,

    /// Seconds to wait for all nodes to be ready after the rolling update
    #[arg(long, default_value = "300")]
    pub node_ready_timeout_seconds: u64,

    /// Seconds to wait for all pods to be running and ready after the rolling update
    #[arg(long, default_value = "300")]
    pub pod_ready_timeout_seconds: u64,

    /// Write a JSON report of the scenario outcomes to this file
    #[arg(long)]
    pub report_file: Option<PathBuf>,

    /// Log format: json or pretty
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Workload under test, as provisioned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub namespace: String,
    pub service: String,
    pub replica_set: String,
    pub replicas: usize,
}

/// Immutable run configuration, built once from [`Args`].
#[derive(Debug, Clone)]
pub struct Config {
    pub scenarios: Vec<ScenarioKind>,
    pub provider: String,
    pub project: Option<String>,
    pub zone: Option<String>,
    pub node_instance_group: Option<String>,
    pub num_nodes: usize,
    pub repo_root: PathBuf,
    pub upgrade_version: String,
    pub workload: Workload,
    pub target_host: Option<String>,
    pub port: u16,
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    pub window_budget: Duration,
    pub iteration_period: Duration,
    pub reachability_timeout: Duration,
    pub per_node_timeout: Duration,
    pub node_ready_timeout: Duration,
    pub pod_ready_timeout: Duration,
    pub report_file: Option<PathBuf>,
    pub log_format: String,
    pub log_level: String,
}

impl Config {
    /// Build and validate the configuration.
    pub fn from_args(args: Args) -> Result<Self, KuvError> {
        if args.replicas == 0 {
            return Err(KuvError::Config("--replicas must be at least 1".to_string()));
        }
        if args.num_nodes == 0 {
            return Err(KuvError::Config("--num-nodes must be at least 1".to_string()));
        }
        if args.probe_timeout_seconds == 0 || args.poll_interval_seconds == 0 {
            return Err(KuvError::Config(
                "probe timeout and poll interval must be positive".to_string(),
            ));
        }
        if args.replica_set.is_empty() {
            return Err(KuvError::Config("--replica-set must not be empty".to_string()));
        }

        let config = Self {
            scenarios: args.scenarios,
            provider: args.provider.to_lowercase(),
            project: args.project,
            zone: args.zone,
            node_instance_group: args.node_instance_group,
            num_nodes: args.num_nodes,
            repo_root: args.repo_root,
            upgrade_version: args.upgrade_version,
            workload: Workload {
                namespace: args.namespace,
                service: args.service,
                replica_set: args.replica_set,
                replicas: args.replicas,
            },
            target_host: args.target_host.filter(|h| !h.is_empty()),
            port: args.port,
            probe_timeout: Duration::from_secs(args.probe_timeout_seconds),
            poll_interval: Duration::from_secs(args.poll_interval_seconds),
            window_budget: Duration::from_secs(args.window_budget_seconds),
            iteration_period: Duration::from_millis(args.iteration_period_ms),
            reachability_timeout: Duration::from_secs(args.reachability_timeout_seconds),
            per_node_timeout: Duration::from_secs(args.per_node_timeout_seconds),
            node_ready_timeout: Duration::from_secs(args.node_ready_timeout_seconds),
            pod_ready_timeout: Duration::from_secs(args.pod_ready_timeout_seconds),
            report_file: args.report_file,
            log_format: args.log_format,
            log_level: args.log_level,
        };

        if config.scenarios.contains(&ScenarioKind::UpgradeCluster) && config.provider_is("gce") {
            config.gce_settings()?;
        }

        Ok(config)
    }

    /// Case-insensitive provider check.
    pub fn provider_is(&self, provider: &str) -> bool {
        self.provider.eq_ignore_ascii_case(provider)
    }

    pub const fn validator_settings(&self) -> ValidatorSettings {
        ValidatorSettings {
            poll_interval: self.poll_interval,
            window_budget: self.window_budget,
            iteration_period: self.iteration_period,
        }
    }

    /// Project, zone and instance group needed to drive a GCE node pool.
    pub fn gce_settings(&self) -> Result<(&str, &str, &str), KuvError> {
        let missing = |flag: &str| KuvError::Config(format!("{flag} is required for node upgrades on gce"));
        Ok((
            self.project.as_deref().ok_or_else(|| missing("--project"))?,
            self.zone.as_deref().ok_or_else(|| missing("--zone"))?,
            self.node_instance_group
                .as_deref()
                .ok_or_else(|| missing("--node-instance-group"))?,
        ))
    }

    /// Log the effective configuration.
    pub fn display(&self) {
        tracing::info!(
            provider = %self.provider,
            scenarios = ?self.scenarios,
            namespace = %self.workload.namespace,
            service = %self.workload.service,
            replica_set = %self.workload.replica_set,
            replicas = self.workload.replicas,
            num_nodes = self.num_nodes,
            upgrade_version = %self.upgrade_version,
            window_budget_seconds = self.window_budget.as_secs(),
            "Configuration initialized"
        );
    }
}
