//! Upgrade cycles: validation sandwiched around a disruptive action.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{KuvError, Phase};
use crate::probe::Probe;
use crate::report::Reporter;
use crate::upgrade::Upgrader;
use crate::validate::{ClusterValidator, WorkloadExpectation};
use crate::validator::{ValidationRun, ValidationSummary, ValidatorSettings};

/// Where the coordinator is within one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    ValidatingUpgrading,
    Joined,
    PostValidated,
}

impl std::fmt::Display for CycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ValidatingUpgrading => write!(f, "validating-upgrading"),
            Self::Joined => write!(f, "joined"),
            Self::PostValidated => write!(f, "post-validated"),
        }
    }
}

/// Runs master and node upgrade cycles one at a time.
pub struct UpgradeCoordinator {
    validator: ClusterValidator,
    probe: Arc<dyn Probe>,
    settings: ValidatorSettings,
    reporter: Reporter,
    expectation: WorkloadExpectation,
    state: CycleState,
}

impl UpgradeCoordinator {
    pub fn new(
        validator: ClusterValidator,
        probe: Arc<dyn Probe>,
        settings: ValidatorSettings,
        reporter: Reporter,
        expectation: WorkloadExpectation,
    ) -> Self {
        Self {
            validator,
            probe,
            settings,
            reporter,
            expectation,
            state: CycleState::Idle,
        }
    }

    pub const fn state(&self) -> CycleState {
        self.state
    }

    fn transition(&mut self, next: CycleState) {
        info!(from = %self.state, to = %next, "Upgrade cycle state changed");
        self.state = next;
    }

    /// Validate the cluster as it stands, attributing failures to `phase`.
    pub async fn validate(&self, phase: Phase) -> Result<(), KuvError> {
        self.validator
            .validate(&self.expectation)
            .await
            .map_err(|e| e.in_phase(phase))
    }

    /// Pre-validate, upgrade the master under continuous probing, then post-validate.
    ///
    /// The background validation is stopped and joined before any action
    /// error is returned. When both fail the action error wins and the
    /// validation failure stays recorded in the reporter.
    pub async fn master_upgrade_cycle(
        &mut self,
        upgrader: &dyn Upgrader,
    ) -> Result<ValidationSummary, KuvError> {
        let result = self.run_master_cycle(upgrader).await;
        self.transition(CycleState::Idle);
        result
    }

    async fn run_master_cycle(
        &mut self,
        upgrader: &dyn Upgrader,
    ) -> Result<ValidationSummary, KuvError> {
        info!("Validating cluster before {}", upgrader.name());
        self.validate(Phase::PreValidate).await?;

        let mut run = ValidationRun::start(
            Arc::clone(&self.probe),
            self.expectation.target.clone(),
            self.settings,
            self.reporter.clone(),
        )
        .await;
        self.transition(CycleState::ValidatingUpgrading);

        info!("Starting {}", upgrader.name());
        let action = upgrader.perform().await;

        run.stop();
        let joined = run.join().await;
        self.transition(CycleState::Joined);

        if let Err(e) = action {
            if joined.is_err() {
                warn!(
                    "Service validation also failed during {}; see earlier failure",
                    upgrader.name()
                );
            }
            return Err(e.in_phase(Phase::MasterUpgrade));
        }
        let summary = joined.map_err(|e| e.in_phase(Phase::DuringUpgrade))?;
        info!(
            windows = summary.windows,
            probes = summary.probes,
            "{} complete",
            upgrader.name()
        );

        info!("Validating cluster after {}", upgrader.name());
        self.validate(Phase::PostValidate).await?;
        self.transition(CycleState::PostValidated);
        Ok(summary)
    }

    /// Pre-validate, replace the node fleet, then post-validate.
    pub async fn node_upgrade_cycle(&mut self, upgrader: &dyn Upgrader) -> Result<(), KuvError> {
        let result = self.run_node_cycle(upgrader).await;
        self.transition(CycleState::Idle);
        result
    }

    async fn run_node_cycle(&mut self, upgrader: &dyn Upgrader) -> Result<(), KuvError> {
        info!("Validating cluster before {}", upgrader.name());
        self.validate(Phase::PreValidate).await?;

        self.transition(CycleState::ValidatingUpgrading);
        info!("Starting {}", upgrader.name());
        upgrader
            .perform()
            .await
            .map_err(|e| e.in_phase(Phase::NodeUpgrade))?;
        self.transition(CycleState::Joined);
        info!("{} complete", upgrader.name());

        info!("Validating cluster after {}", upgrader.name());
        self.validate(Phase::PostValidate).await?;
        self.transition(CycleState::PostValidated);
        Ok(())
    }
}
