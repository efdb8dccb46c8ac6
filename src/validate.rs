//! Point-in-time cluster validation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cluster::ClusterApi;
use crate::config::Workload;
use crate::error::{Check, KuvError};
use crate::probe::{Probe, Target, poll_until_healthy};

/// Everything the cluster must still look like after an upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadExpectation {
    pub namespace: String,
    pub service: String,
    pub replica_set: String,
    pub target: Target,
    pub replicas: usize,
}

impl WorkloadExpectation {
    pub fn new(workload: &Workload, target: Target) -> Self {
        Self {
            namespace: workload.namespace.clone(),
            service: workload.service.clone(),
            replica_set: workload.replica_set.clone(),
            target,
            replicas: workload.replicas,
        }
    }
}

/// Stateless validator; calling it twice without a cluster change gives the same verdict.
pub struct ClusterValidator {
    api: Arc<dyn ClusterApi>,
    probe: Arc<dyn Probe>,
    poll_interval: Duration,
    reachability_budget: Duration,
}

impl ClusterValidator {
    pub fn new(
        api: Arc<dyn ClusterApi>,
        probe: Arc<dyn Probe>,
        poll_interval: Duration,
        reachability_budget: Duration,
    ) -> Self {
        Self {
            api,
            probe,
            poll_interval,
            reachability_budget,
        }
    }

    /// Run all checks in order and return the first that fails.
    pub async fn validate(&self, want: &WorkloadExpectation) -> Result<(), KuvError> {
        info!("Beginning cluster validation");

        // Replica-set.
        let rcs = self.api.list_replica_sets(&want.namespace).await?;
        let [rc] = rcs.as_slice() else {
            return Err(failed(
                Check::ReplicaSetCount,
                format!("wanted 1 RC, got {}", rcs.len()),
                1,
                rcs.len(),
            ));
        };
        if rc.name != want.replica_set {
            return Err(failed(
                Check::ReplicaSetName,
                format!("wanted RC name {:?}, got {:?}", want.replica_set, rc.name),
                &want.replica_set,
                &rc.name,
            ));
        }

        // Pods.
        let pods = self.api.pod_readiness(&want.namespace, &rc.selector).await?;
        debug!(
            "{}/{} {} pods running and ready",
            pods.running_ready, pods.total, want.replica_set
        );
        if pods.running_ready != want.replicas {
            return Err(failed(
                Check::PodReadiness,
                format!(
                    "failed to find {} running and ready {:?} pods ({} listed)",
                    want.replicas, want.replica_set, pods.total
                ),
                want.replicas,
                pods.running_ready,
            ));
        }

        // Service.
        let Some(svc) = self.api.get_service(&want.namespace, &want.service).await? else {
            return Err(failed(
                Check::ServiceExists,
                format!("service {}/{} not found", want.namespace, want.service),
                &want.service,
                "none",
            ));
        };
        if svc.name != want.service {
            return Err(failed(
                Check::ServiceName,
                format!("wanted service name {:?}, got {:?}", want.service, svc.name),
                &want.service,
                &svc.name,
            ));
        }

        // Load balancer.
        let reach = poll_until_healthy(
            self.probe.as_ref(),
            &want.target,
            self.poll_interval,
            self.reachability_budget,
        )
        .await;
        if !reach.is_healthy() {
            return Err(failed(
                Check::IngressReachable,
                format!(
                    "{} not reachable within {:?} ({} probes)",
                    want.target, self.reachability_budget, reach.attempts
                ),
                "healthy response",
                reach.outcome,
            ));
        }

        info!("Cluster validation succeeded");
        Ok(())
    }
}

fn failed(
    check: Check,
    detail: String,
    expected: impl ToString,
    observed: impl ToString,
) -> KuvError {
    KuvError::PostCondition {
        check,
        detail,
        expected: expected.to_string(),
        observed: observed.to_string(),
    }
}
