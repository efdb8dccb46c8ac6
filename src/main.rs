use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kuv::cluster::{ClusterApi, ingress_target};
use kuv::config::{Args, BUILD_DATE, COMMIT, Config, ScenarioKind, VERSION};
use kuv::invoke::{ActionInvoker, ScriptRunner};
use kuv::k8s::KubeClusterApi;
use kuv::logging;
use kuv::nodepool::{GceManagedInstanceGroup, NodePool};
use kuv::probe::{HttpProbe, Probe, Target};
use kuv::report::Reporter;
use kuv::scenario::{ScenarioEnv, run_all};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init(&args.log_format, &args.log_level);

    info!(
        version = VERSION,
        commit = COMMIT,
        build_date = BUILD_DATE,
        "kuv starting"
    );

    match run(args).await {
        Ok(true) => info!("All scenarios passed"),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!(error = %e, "kuv failed");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let config = Arc::new(Config::from_args(args)?);
    config.display();

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let api: Arc<dyn ClusterApi> = Arc::new(KubeClusterApi::new(client));

    let target = match &config.target_host {
        Some(host) => Target::new(host.clone(), config.port),
        None => {
            ingress_target(
                api.as_ref(),
                &config.workload.namespace,
                &config.workload.service,
                config.port,
            )
            .await?
        }
    };

    let invoker: Arc<dyn ActionInvoker> = Arc::new(ScriptRunner::new(config.repo_root.clone()));
    let probe: Arc<dyn Probe> = Arc::new(HttpProbe::new(config.probe_timeout)?);

    let node_pool: Option<Arc<dyn NodePool>> =
        if config.provider_is("gce") && config.scenarios.contains(&ScenarioKind::UpgradeCluster) {
            let (project, zone, group) = config.gce_settings()?;
            Some(Arc::new(GceManagedInstanceGroup::new(
                Arc::clone(&invoker),
                project,
                zone,
                group,
                config.num_nodes,
            )))
        } else {
            None
        };

    let env = ScenarioEnv {
        config: Arc::clone(&config),
        invoker,
        api,
        probe,
        node_pool,
        target,
        reporter: Reporter::new(),
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Received SIGINT, aborting remaining scenarios");
                shutdown.cancel();
            }
        }
    });

    let report = run_all(&env, &config.scenarios, &shutdown).await;

    if let Some(path) = &config.report_file {
        report.write_json(path)?;
        info!(path = %path.display(), "Report written");
    }

    for record in &report.scenarios {
        info!(scenario = %record.name, outcome = ?record.outcome, "Scenario result");
    }

    Ok(report.is_success())
}
