//! `kube`-backed implementation of [`ClusterApi`].

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, ReplicationController, Service};
use kube::Api;
use kube::api::ListParams;
use tracing::debug;

use crate::cluster::{ClusterApi, IngressPoint, PodReadiness, ReplicaSetInfo, ServiceInfo};
use crate::error::KuvError;

/// Cluster API client over a `kube::Client`.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: kube::Client,
}

impl KubeClusterApi {
    pub const fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_replica_sets(&self, namespace: &str) -> Result<Vec<ReplicaSetInfo>, KuvError> {
        let rcs: Api<ReplicationController> = Api::namespaced(self.client.clone(), namespace);
        let list = rcs.list(&ListParams::default()).await.map_err(|e| {
            KuvError::KubernetesApi(format!("Failed to list RCs in {namespace}: {e}"))
        })?;

        debug!("Found {} RCs in {}", list.items.len(), namespace);
        Ok(list
            .items
            .into_iter()
            .map(|rc| ReplicaSetInfo {
                name: rc.metadata.name.unwrap_or_default(),
                selector: rc.spec.and_then(|s| s.selector).unwrap_or_default(),
            })
            .collect())
    }

    async fn pod_readiness(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<PodReadiness, KuvError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&label_selector(selector));
        }

        let list = pods.list(&params).await.map_err(|e| {
            KuvError::KubernetesApi(format!("Failed to list pods in {namespace}: {e}"))
        })?;

        let readiness = PodReadiness {
            total: list.items.len(),
            running_ready: list.items.iter().filter(|p| is_pod_running_ready(p)).count(),
        };
        debug!(
            "Pods in {} matching {:?}: {}/{} running and ready",
            namespace, selector, readiness.running_ready, readiness.total
        );
        Ok(readiness)
    }

    async fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceInfo>, KuvError> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let svc = services.get_opt(name).await.map_err(|e| {
            KuvError::KubernetesApi(format!("Error getting service {namespace}/{name}: {e}"))
        })?;

        Ok(svc.map(|svc| ServiceInfo {
            name: svc.metadata.name.unwrap_or_default(),
            ingress: svc
                .status
                .and_then(|s| s.load_balancer)
                .and_then(|lb| lb.ingress)
                .unwrap_or_default()
                .into_iter()
                .map(|i| IngressPoint {
                    ip: i.ip,
                    hostname: i.hostname,
                })
                .collect(),
        }))
    }

    async fn ready_node_count(&self) -> Result<usize, KuvError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(|e| KuvError::KubernetesApi(format!("Failed to list nodes: {e}")))?;

        let ready = list.items.iter().filter(|n| is_node_ready(n)).count();
        debug!("{}/{} nodes ready", ready, list.items.len());
        Ok(ready)
    }
}

/// Render a label map as a `k=v,k=v` selector.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// A pod counts when its phase is Running and its Ready condition is True.
pub fn is_pod_running_ready(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };
    status.phase.as_deref() == Some("Running")
        && status
            .conditions
            .as_ref()
            .is_some_and(|c| c.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

/// A node counts when it is schedulable and its Ready condition is True.
pub fn is_node_ready(node: &Node) -> bool {
    let schedulable = !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false);
    schedulable
        && node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .is_some_and(|c| c.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}
