//! Pluggable upgrade actions.
//!
//! The coordinator only sees success or failure of [`Upgrader::perform`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::KuvError;
use crate::invoke::ActionInvoker;
use crate::rolling::RollingNodeUpdater;

pub const PUSH_SCRIPT: &str = "hack/e2e-internal/e2e-push.sh";
pub const UPGRADE_SCRIPT: &str = "hack/e2e-internal/e2e-upgrade.sh";

/// A disruptive administrative operation run by the supervising task.
#[async_trait]
pub trait Upgrader: Send + Sync {
    /// Human-readable action name used in logs and errors.
    fn name(&self) -> &str;

    async fn perform(&self) -> Result<(), KuvError>;
}

/// Pushes locally built binaries to the master.
pub struct MasterPush {
    invoker: Arc<dyn ActionInvoker>,
}

impl MasterPush {
    pub fn new(invoker: Arc<dyn ActionInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl Upgrader for MasterPush {
    fn name(&self) -> &str {
        "master push"
    }

    async fn perform(&self) -> Result<(), KuvError> {
        self.invoker
            .run(PUSH_SCRIPT, &["-m".to_string()])
            .await
            .map_err(|e| action_failed(self.name(), &e))?;
        Ok(())
    }
}

/// Upgrades the master to a released or CI version.
pub struct MasterUpgrade {
    invoker: Arc<dyn ActionInvoker>,
    version: String,
}

impl MasterUpgrade {
    pub fn new(invoker: Arc<dyn ActionInvoker>, version: impl Into<String>) -> Self {
        Self {
            invoker,
            version: version.into(),
        }
    }
}

#[async_trait]
impl Upgrader for MasterUpgrade {
    fn name(&self) -> &str {
        "master upgrade"
    }

    async fn perform(&self) -> Result<(), KuvError> {
        info!("Upgrading master to {}", self.version);
        self.invoker
            .run(UPGRADE_SCRIPT, &["-M".to_string(), self.version.clone()])
            .await
            .map_err(|e| action_failed(self.name(), &e))?;
        Ok(())
    }
}

/// Replaces the node fleet through a [`RollingNodeUpdater`].
pub struct NodeUpgrade {
    updater: RollingNodeUpdater,
}

impl NodeUpgrade {
    pub const fn new(updater: RollingNodeUpdater) -> Self {
        Self { updater }
    }
}

#[async_trait]
impl Upgrader for NodeUpgrade {
    fn name(&self) -> &str {
        "node upgrade"
    }

    async fn perform(&self) -> Result<(), KuvError> {
        // Step errors already name the step and template.
        self.updater.run().await.map(|_| ())
    }
}

fn action_failed(action: &str, err: &KuvError) -> KuvError {
    KuvError::Action {
        action: action.to_string(),
        message: err.to_string(),
    }
}
