//! Upgrade scenarios and provider gating.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cluster::ClusterApi;
use crate::config::{Config, ScenarioKind};
use crate::coordinator::UpgradeCoordinator;
use crate::error::{KuvError, Phase};
use crate::invoke::ActionInvoker;
use crate::nodepool::NodePool;
use crate::probe::{Probe, Target};
use crate::report::{Reporter, RunReport, ScenarioOutcome, ScenarioRecord};
use crate::rolling::{FleetExpectation, RollingNodeUpdater, RollingSettings};
use crate::template::{CleanupOutcome, cleanup_node_template};
use crate::upgrade::{MasterPush, MasterUpgrade, NodeUpgrade};
use crate::validate::{ClusterValidator, WorkloadExpectation};

/// Collaborators shared by every scenario of a run.
#[derive(Clone)]
pub struct ScenarioEnv {
    pub config: Arc<Config>,
    pub invoker: Arc<dyn ActionInvoker>,
    pub api: Arc<dyn ClusterApi>,
    pub probe: Arc<dyn Probe>,
    /// Only needed by `upgrade-cluster`.
    pub node_pool: Option<Arc<dyn NodePool>>,
    pub target: Target,
    pub reporter: Reporter,
}

impl ScenarioEnv {
    fn coordinator(&self) -> UpgradeCoordinator {
        let config = &self.config;
        UpgradeCoordinator::new(
            ClusterValidator::new(
                Arc::clone(&self.api),
                Arc::clone(&self.probe),
                config.poll_interval,
                config.reachability_timeout,
            ),
            Arc::clone(&self.probe),
            config.validator_settings(),
            self.reporter.clone(),
            WorkloadExpectation::new(&config.workload, self.target.clone()),
        )
    }

    fn rolling_updater(&self, pool: Arc<dyn NodePool>) -> RollingNodeUpdater {
        let config = &self.config;
        RollingNodeUpdater::new(
            Arc::clone(&self.invoker),
            pool,
            Arc::clone(&self.api),
            config.upgrade_version.clone(),
            FleetExpectation {
                num_nodes: config.num_nodes,
                namespace: config.workload.namespace.clone(),
                replicas: config.workload.replicas,
            },
            RollingSettings {
                per_node_timeout: config.per_node_timeout,
                node_ready_timeout: config.node_ready_timeout,
                pod_ready_timeout: config.pod_ready_timeout,
                ..RollingSettings::default()
            },
        )
    }
}

/// Provider a scenario needs, if any.
pub const fn required_provider(kind: ScenarioKind) -> Option<&'static str> {
    match kind {
        ScenarioKind::KubePush => None,
        ScenarioKind::UpgradeMaster | ScenarioKind::UpgradeCluster => Some("gce"),
    }
}

/// Run the scenarios in order. A failed scenario does not stop the rest.
///
/// Cancelling `shutdown` abandons the scenario in flight and returns the
/// records finished so far, marked as interrupted.
pub async fn run_all(
    env: &ScenarioEnv,
    kinds: &[ScenarioKind],
    shutdown: &CancellationToken,
) -> RunReport {
    let mut report = RunReport::default();
    for kind in kinds {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => {
                warn!(scenario = %kind, "Run cancelled, skipping remaining scenarios");
                report.interrupted = true;
                break;
            }
            record = run_scenario(env, *kind) => report.push(record),
        }
    }
    info!(
        total = report.scenarios.len(),
        failed = report.failed_count(),
        interrupted = report.interrupted,
        "All scenarios finished"
    );
    report
}

/// Run one scenario and record its outcome.
pub async fn run_scenario(env: &ScenarioEnv, kind: ScenarioKind) -> ScenarioRecord {
    let started_at = Utc::now();
    info!(scenario = %kind, "Starting scenario");

    let outcome = match required_provider(kind) {
        Some(provider) if !env.config.provider_is(provider) => {
            let reason = format!(
                "Skipping upgrade test, which is not implemented for {}",
                env.config.provider
            );
            info!(scenario = %kind, "{}", reason);
            ScenarioOutcome::Skipped { reason }
        }
        _ => {
            let result = match kind {
                ScenarioKind::KubePush => kube_push(env).await,
                ScenarioKind::UpgradeMaster => upgrade_master(env).await,
                ScenarioKind::UpgradeCluster => upgrade_cluster(env).await,
            };
            match result {
                Ok(()) => match env.reporter.first_failure() {
                    // A failure raised off the supervising task still fails the scenario.
                    Some(failure) => ScenarioOutcome::Failed {
                        phase: Some(failure.phase),
                        error: failure.message,
                    },
                    None => ScenarioOutcome::Passed,
                },
                Err(e) => {
                    error!(scenario = %kind, "Scenario failed: {}", e);
                    ScenarioOutcome::failed(&e)
                }
            }
        }
    };

    let record = ScenarioRecord {
        name: kind.to_string(),
        outcome,
        failures: env.reporter.drain(),
        started_at,
        completed_at: Utc::now(),
    };
    info!(
        scenario = %record.name,
        failed = record.outcome.is_failed(),
        "Scenario finished"
    );
    record
}

async fn kube_push(env: &ScenarioEnv) -> Result<(), KuvError> {
    let push = MasterPush::new(Arc::clone(&env.invoker));
    env.coordinator().master_upgrade_cycle(&push).await?;
    Ok(())
}

async fn upgrade_master(env: &ScenarioEnv) -> Result<(), KuvError> {
    let upgrade = MasterUpgrade::new(Arc::clone(&env.invoker), env.config.upgrade_version.clone());
    env.coordinator().master_upgrade_cycle(&upgrade).await?;
    Ok(())
}

async fn upgrade_cluster(env: &ScenarioEnv) -> Result<(), KuvError> {
    let pool = env.node_pool.clone().ok_or_else(|| {
        KuvError::Config("upgrade-cluster needs a node pool".to_string()).in_phase(Phase::PreValidate)
    })?;

    info!("Getting the node template before the upgrade");
    let before = pool
        .current_template()
        .await
        .map_err(|e| e.in_phase(Phase::PreValidate))?;

    let result = upgrade_master_then_nodes(env, Arc::clone(&pool)).await;

    // Cleanup runs on every path and never changes the verdict.
    match cleanup_node_template(pool.as_ref(), &before).await {
        CleanupOutcome::Deleted { template } => info!("Deleted node template {}", template),
        CleanupOutcome::StillInUse { .. } => {}
        CleanupOutcome::PossibleLeak { template, reason } => {
            warn!(template = %template, "Node template cleanup incomplete: {}", reason);
        }
    }

    result
}

async fn upgrade_master_then_nodes(
    env: &ScenarioEnv,
    pool: Arc<dyn NodePool>,
) -> Result<(), KuvError> {
    let mut coordinator = env.coordinator();

    let master = MasterUpgrade::new(Arc::clone(&env.invoker), env.config.upgrade_version.clone());
    coordinator.master_upgrade_cycle(&master).await?;

    let nodes = NodeUpgrade::new(env.rolling_updater(pool));
    coordinator.node_upgrade_cycle(&nodes).await
}
