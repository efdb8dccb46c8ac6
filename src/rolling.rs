//! Rolling node replacement and fleet re-convergence.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterApi, FleetState};
use crate::error::{KuvError, RollingStep};
use crate::invoke::ActionInvoker;
use crate::nodepool::NodePool;

pub const NODE_TEMPLATE_SCRIPT: &str = "hack/e2e-internal/e2e-upgrade.sh";

/// Interval between readiness checks while waiting for convergence.
pub const CONVERGENCE_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingSettings {
    pub per_node_timeout: Duration,
    pub node_ready_timeout: Duration,
    pub pod_ready_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RollingSettings {
    fn default() -> Self {
        Self {
            per_node_timeout: Duration::from_secs(5 * 60),
            node_ready_timeout: Duration::from_secs(5 * 60),
            pod_ready_timeout: Duration::from_secs(5 * 60),
            poll_interval: CONVERGENCE_POLL_INTERVAL,
        }
    }
}

/// Fleet the node upgrade must converge back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetExpectation {
    pub num_nodes: usize,
    pub namespace: String,
    pub replicas: usize,
}

/// Replaces every node with one built from a freshly prepared template.
///
/// Steps run strictly in order and the first failure aborts the rest.
pub struct RollingNodeUpdater {
    invoker: Arc<dyn ActionInvoker>,
    pool: Arc<dyn NodePool>,
    api: Arc<dyn ClusterApi>,
    version: String,
    fleet: FleetExpectation,
    settings: RollingSettings,
}

impl RollingNodeUpdater {
    pub fn new(
        invoker: Arc<dyn ActionInvoker>,
        pool: Arc<dyn NodePool>,
        api: Arc<dyn ClusterApi>,
        version: impl Into<String>,
        fleet: FleetExpectation,
        settings: RollingSettings,
    ) -> Self {
        Self {
            invoker,
            pool,
            api,
            version: version.into(),
            fleet,
            settings,
        }
    }

    /// Run all four steps. Returns the template the fleet now runs on.
    pub async fn run(&self) -> Result<String, KuvError> {
        info!("Preparing node upgrade by creating new instance template");
        let template = self.acquire_template().await.map_err(|e| KuvError::RollingUpdate {
            step: RollingStep::AcquireTemplate,
            template: "<none>".to_string(),
            message: e.to_string(),
        })?;
        let fail = |step: RollingStep| {
            let template = template.clone();
            move |e: KuvError| KuvError::RollingUpdate {
                step,
                template,
                message: e.to_string(),
            }
        };

        info!(
            "Performing a node upgrade to {}; waiting at most {:?} per node",
            template, self.settings.per_node_timeout
        );
        self.pool
            .rolling_update(&template, self.settings.per_node_timeout)
            .await
            .map_err(fail(RollingStep::RollingReplace))?;

        info!(
            "Waiting up to {:?} for all nodes to be ready after the upgrade",
            self.settings.node_ready_timeout
        );
        self.wait_for_nodes_ready()
            .await
            .map_err(fail(RollingStep::NodesReady))?;

        info!(
            "Waiting up to {:?} for all pods to be running and ready after the upgrade",
            self.settings.pod_ready_timeout
        );
        self.wait_for_pods_ready()
            .await
            .map_err(fail(RollingStep::PodsReady))?;

        info!(template = %template, "Node upgrade converged");
        Ok(template)
    }

    async fn acquire_template(&self) -> Result<String, KuvError> {
        let out = self
            .invoker
            .run(NODE_TEMPLATE_SCRIPT, &["-P".to_string(), self.version.clone()])
            .await?;
        let template = out.stdout.trim().to_string();
        if template.is_empty() {
            return Err(KuvError::Script(format!(
                "{NODE_TEMPLATE_SCRIPT} -P {} printed no template name",
                self.version
            )));
        }
        Ok(template)
    }

    async fn wait_for_nodes_ready(&self) -> Result<(), KuvError> {
        let timeout = self.settings.node_ready_timeout;
        let start = Instant::now();

        loop {
            match self.api.ready_node_count().await {
                Ok(ready) => {
                    let fleet = FleetState {
                        desired: self.fleet.num_nodes,
                        ready,
                    };
                    debug!("{}/{} nodes ready", fleet.ready, fleet.desired);
                    if fleet.is_converged() {
                        return Ok(());
                    }
                    if start.elapsed() >= timeout {
                        return Err(KuvError::Timeout {
                            operation: "nodes ready".to_string(),
                            details: format!(
                                "{}/{} ready after {}s",
                                fleet.ready,
                                fleet.desired,
                                timeout.as_secs()
                            ),
                        });
                    }
                }
                Err(e) if e.is_transient() && start.elapsed() < timeout => {
                    warn!("Error listing nodes, retrying: {}", e);
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn wait_for_pods_ready(&self) -> Result<(), KuvError> {
        let timeout = self.settings.pod_ready_timeout;
        let start = Instant::now();
        let everything = BTreeMap::new();

        loop {
            match self
                .api
                .pod_readiness(&self.fleet.namespace, &everything)
                .await
            {
                Ok(pods) => {
                    debug!(
                        "{}/{} pods running and ready (want {})",
                        pods.running_ready, pods.total, self.fleet.replicas
                    );
                    if pods.running_ready >= self.fleet.replicas {
                        return Ok(());
                    }
                    if start.elapsed() >= timeout {
                        return Err(KuvError::Timeout {
                            operation: "pods running and ready".to_string(),
                            details: format!(
                                "{}/{} running and ready in {} after {}s",
                                pods.running_ready,
                                self.fleet.replicas,
                                self.fleet.namespace,
                                timeout.as_secs()
                            ),
                        });
                    }
                }
                Err(e) if e.is_transient() && start.elapsed() < timeout => {
                    warn!("Error listing pods, retrying: {}", e);
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{PodReadiness, ReplicaSetInfo, ServiceInfo};
    use crate::invoke::ScriptOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Script(&'static str);

    #[async_trait]
    impl ActionInvoker for Script {
        async fn run(&self, _program: &str, _args: &[String]) -> Result<ScriptOutput, KuvError> {
            Ok(ScriptOutput {
                stdout: self.0.to_string(),
                stderr: String::new(),
            })
        }
    }

    #[derive(Default)]
    struct Pool {
        fail: bool,
        rolled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NodePool for Pool {
        async fn current_template(&self) -> Result<String, KuvError> {
            Ok("tmpl-A".to_string())
        }
        async fn rolling_update(&self, template: &str, _: Duration) -> Result<(), KuvError> {
            if self.fail {
                return Err(KuvError::Script("instance failed to start".to_string()));
            }
            self.rolled.lock().unwrap().push(template.to_string());
            Ok(())
        }
        async fn delete_template(&self, _: &str) -> Result<(), KuvError> {
            Ok(())
        }
    }

    /// Nodes become ready one poll at a time.
    struct Fleet {
        ready_nodes: AtomicUsize,
        ready_pods: usize,
        pod_polls: AtomicUsize,
    }

    #[async_trait]
    impl ClusterApi for Fleet {
        async fn list_replica_sets(&self, _: &str) -> Result<Vec<ReplicaSetInfo>, KuvError> {
            Ok(vec![])
        }
        async fn pod_readiness(
            &self,
            _: &str,
            selector: &BTreeMap<String, String>,
        ) -> Result<PodReadiness, KuvError> {
            assert!(selector.is_empty());
            self.pod_polls.fetch_add(1, Ordering::SeqCst);
            Ok(PodReadiness {
                total: self.ready_pods,
                running_ready: self.ready_pods,
            })
        }
        async fn get_service(&self, _: &str, _: &str) -> Result<Option<ServiceInfo>, KuvError> {
            Ok(None)
        }
        async fn ready_node_count(&self) -> Result<usize, KuvError> {
            Ok(self.ready_nodes.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn fleet(ready_pods: usize) -> Arc<Fleet> {
        Arc::new(Fleet {
            ready_nodes: AtomicUsize::new(0),
            ready_pods,
            pod_polls: AtomicUsize::new(0),
        })
    }

    fn updater(
        stdout: &'static str,
        pool: Arc<Pool>,
        api: Arc<Fleet>,
    ) -> RollingNodeUpdater {
        RollingNodeUpdater::new(
            Arc::new(Script(stdout)),
            pool,
            api,
            "latest_ci",
            FleetExpectation {
                num_nodes: 3,
                namespace: "e2e-tests".to_string(),
                replicas: 2,
            },
            RollingSettings {
                per_node_timeout: Duration::from_secs(60),
                node_ready_timeout: Duration::from_secs(60),
                pod_ready_timeout: Duration::from_secs(30),
                poll_interval: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_converges() {
        let pool = Arc::new(Pool::default());
        let api = fleet(2);
        let template = updater("tmpl-B\n", pool.clone(), api.clone())
            .run()
            .await
            .unwrap();

        assert_eq!(template, "tmpl-B");
        assert_eq!(*pool.rolled.lock().unwrap(), vec!["tmpl-B".to_string()]);
        assert_eq!(api.pod_polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_template_output_aborts() {
        let pool = Arc::new(Pool::default());
        let err = updater("  \n", pool.clone(), fleet(2))
            .run()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            KuvError::RollingUpdate {
                step: RollingStep::AcquireTemplate,
                ..
            }
        ));
        assert!(pool.rolled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rolling_replace_failure_names_step_and_template() {
        let pool = Arc::new(Pool {
            fail: true,
            ..Default::default()
        });
        let api = fleet(2);
        let err = updater("tmpl-B", pool, api.clone())
            .run()
            .await
            .unwrap_err();

        let KuvError::RollingUpdate { step, template, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(*step, RollingStep::RollingReplace);
        assert_eq!(template, "tmpl-B");
        assert_eq!(api.pod_polls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pods_not_ready_times_out() {
        let err = updater("tmpl-B", Arc::new(Pool::default()), fleet(1))
            .run()
            .await
            .unwrap_err();

        let KuvError::RollingUpdate { step, message, .. } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(*step, RollingStep::PodsReady);
        assert!(message.contains("1/2"));
    }
}
