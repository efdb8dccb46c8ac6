//! Cluster API surface consumed by the validators.
//!
//! Calls are not retried here; callers decide on retry policy.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::info;

use crate::error::KuvError;
use crate::probe::Target;

/// Replica-set (replication controller) under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSetInfo {
    pub name: String,
    pub selector: BTreeMap<String, String>,
}

/// Pod counts for a label selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodReadiness {
    pub total: usize,
    pub running_ready: usize,
}

/// Load-balancer ingress point of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngressPoint {
    pub ip: Option<String>,
    pub hostname: Option<String>,
}

/// Service under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub ingress: Vec<IngressPoint>,
}

/// Desired vs observed ready nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetState {
    pub desired: usize,
    pub ready: usize,
}

impl FleetState {
    pub const fn is_converged(&self) -> bool {
        self.ready >= self.desired
    }
}

/// Read-only cluster calls.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// List replica-sets in a namespace.
    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSetInfo>, KuvError>;

    /// Count pods matching `selector`; an empty selector matches every pod.
    async fn pod_readiness(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<PodReadiness, KuvError>;

    /// Get a service by name; `None` if it does not exist.
    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceInfo>, KuvError>;

    /// Number of schedulable nodes reporting Ready.
    async fn ready_node_count(&self) -> Result<usize, KuvError>;
}

/// Resolve the probe target from a service's load-balancer ingress.
///
/// The service must expose exactly one ingress point.
pub async fn ingress_target(
    api: &dyn ClusterApi,
    namespace: &str,
    service: &str,
    port: u16,
) -> Result<Target, KuvError> {
    let svc = api
        .get_service(namespace, service)
        .await?
        .ok_or_else(|| KuvError::KubernetesApi(format!("Service {namespace}/{service} not found")))?;

    let [ingress] = svc.ingress.as_slice() else {
        return Err(KuvError::KubernetesApi(format!(
            "Was expecting only 1 ingress point for service {} but got {}: {:?}",
            service,
            svc.ingress.len(),
            svc.ingress
        )));
    };

    let target = Target::from_ingress(ingress.ip.as_deref(), ingress.hostname.as_deref(), port)?;
    info!(service = %service, target = %target, "Got load balancer ingress point");
    Ok(target)
}
