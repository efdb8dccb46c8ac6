#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;

use kuv::cluster::{ClusterApi, PodReadiness, ReplicaSetInfo, ServiceInfo};
use kuv::config::{Args, Config};
use kuv::error::KuvError;
use kuv::invoke::{ActionInvoker, ScriptOutput};
use kuv::nodepool::NodePool;
use kuv::probe::{Probe, ProbeOutcome, Target};

/// Cluster holding one replica-set `baz-rc` behind service `baz`.
pub struct FakeCluster {
    pub replica_sets: Mutex<Vec<ReplicaSetInfo>>,
    pub ready_pods: AtomicUsize,
    pub ready_nodes: AtomicUsize,
}

impl FakeCluster {
    pub fn healthy(pods: usize, nodes: usize) -> Arc<Self> {
        Arc::new(Self {
            replica_sets: Mutex::new(vec![ReplicaSetInfo {
                name: "baz-rc".to_string(),
                selector: BTreeMap::from([("name".to_string(), "baz".to_string())]),
            }]),
            ready_pods: AtomicUsize::new(pods),
            ready_nodes: AtomicUsize::new(nodes),
        })
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_replica_sets(&self, _: &str) -> Result<Vec<ReplicaSetInfo>, KuvError> {
        Ok(self.replica_sets.lock().unwrap().clone())
    }

    async fn pod_readiness(
        &self,
        _: &str,
        _: &BTreeMap<String, String>,
    ) -> Result<PodReadiness, KuvError> {
        let ready = self.ready_pods.load(Ordering::SeqCst);
        Ok(PodReadiness {
            total: ready,
            running_ready: ready,
        })
    }

    async fn get_service(&self, _: &str, name: &str) -> Result<Option<ServiceInfo>, KuvError> {
        Ok((name == "baz").then(|| ServiceInfo {
            name: "baz".to_string(),
            ingress: vec![],
        }))
    }

    async fn ready_node_count(&self) -> Result<usize, KuvError> {
        Ok(self.ready_nodes.load(Ordering::SeqCst))
    }
}

/// Probe whose health can be flipped from another task.
pub struct ToggleProbe {
    pub healthy: AtomicBool,
    pub calls: AtomicU32,
}

impl ToggleProbe {
    pub fn new(healthy: bool) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(healthy),
            calls: AtomicU32::new(0),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ToggleProbe {
    async fn probe(&self, _: &Target) -> ProbeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            ProbeOutcome::Healthy { status: 200 }
        } else {
            ProbeOutcome::Unhealthy { status: 503 }
        }
    }
}

type Responder = dyn Fn(&str, &[String]) -> Result<String, String> + Send + Sync;

/// Invoker answering from a closure and recording every call.
pub struct FakeInvoker {
    respond: Box<Responder>,
    pub calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl FakeInvoker {
    pub fn new(
        respond: impl Fn(&str, &[String]) -> Result<String, String> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn programs(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }
}

#[async_trait]
impl ActionInvoker for FakeInvoker {
    async fn run(&self, program: &str, args: &[String]) -> Result<ScriptOutput, KuvError> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_string(), args.to_vec()));
        (self.respond)(program, args)
            .map(|stdout| ScriptOutput {
                stdout,
                stderr: String::new(),
            })
            .map_err(KuvError::Script)
    }
}

/// Node pool that adopts whatever template it is rolled to.
pub struct FakePool {
    pub current: Mutex<String>,
    pub deleted: Mutex<Vec<String>>,
}

impl FakePool {
    pub fn on(template: &str) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(template.to_string()),
            deleted: Mutex::new(Vec::new()),
        })
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodePool for FakePool {
    async fn current_template(&self) -> Result<String, KuvError> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn rolling_update(&self, template: &str, _: Duration) -> Result<(), KuvError> {
        *self.current.lock().unwrap() = template.to_string();
        Ok(())
    }

    async fn delete_template(&self, template: &str) -> Result<(), KuvError> {
        self.deleted.lock().unwrap().push(template.to_string());
        Ok(())
    }
}

/// Config for a small cluster with short timeouts.
pub fn config(provider: &str, scenarios: &[&str]) -> Arc<Config> {
    let mut argv = vec![
        "kuv",
        "--replica-set",
        "baz-rc",
        "--provider",
        provider,
        "--project",
        "proj",
        "--zone",
        "us-central1-b",
        "--node-instance-group",
        "kubernetes-minion-group",
        "--num-nodes",
        "3",
        "--replicas",
        "2",
        "--poll-interval-seconds",
        "1",
        "--window-budget-seconds",
        "5",
        "--reachability-timeout-seconds",
        "5",
        "--per-node-timeout-seconds",
        "10",
        "--node-ready-timeout-seconds",
        "30",
        "--pod-ready-timeout-seconds",
        "30",
    ];
    for scenario in scenarios {
        argv.push("-s");
        argv.push(scenario);
    }
    Arc::new(Config::from_args(Args::try_parse_from(argv).unwrap()).unwrap())
}
