//! Fatal-failure sink shared between tasks and the run report.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::error::{KuvError, Phase};

/// A fatal failure together with where it was raised.
#[derive(Debug, Clone, Serialize)]
pub struct Failure {
    pub phase: Phase,
    /// What was being checked when the failure fired (e.g. the probed target).
    pub context: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Thread-safe fatal-failure channel.
///
/// Background tasks and the supervising task report through the same sink,
/// so a failure raised off the main control path still fails the scenario.
#[derive(Clone, Default)]
pub struct Reporter {
    failures: Arc<Mutex<Vec<Failure>>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a fatal failure.
    pub fn fail(&self, phase: Phase, context: impl Into<String>, message: impl Into<String>) {
        let failure = Failure {
            phase,
            context: context.into(),
            message: message.into(),
            at: Utc::now(),
        };
        error!(
            phase = %failure.phase,
            context = %failure.context,
            "FAIL: {}",
            failure.message
        );
        self.lock().push(failure);
    }

    pub fn has_failed(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn first_failure(&self) -> Option<Failure> {
        self.lock().first().cloned()
    }

    pub fn failures(&self) -> Vec<Failure> {
        self.lock().clone()
    }

    /// Take every recorded failure, leaving the sink empty for the next scenario.
    pub fn drain(&self) -> Vec<Failure> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Failure>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Final state of one scenario.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScenarioOutcome {
    Passed,
    Skipped { reason: String },
    Failed { phase: Option<Phase>, error: String },
}

impl ScenarioOutcome {
    pub fn failed(err: &KuvError) -> Self {
        Self::Failed {
            phase: err.phase(),
            error: err.to_string(),
        }
    }

    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Report entry for one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRecord {
    pub name: String,
    #[serde(flatten)]
    pub outcome: ScenarioOutcome,
    /// Failures raised through the reporter while the scenario ran.
    pub failures: Vec<Failure>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Report for a whole invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub scenarios: Vec<ScenarioRecord>,
    /// Set when the run was cancelled before every scenario finished.
    pub interrupted: bool,
}

impl RunReport {
    pub fn push(&mut self, record: ScenarioRecord) {
        self.scenarios.push(record);
    }

    pub fn failed_count(&self) -> usize {
        self.scenarios
            .iter()
            .filter(|s| s.outcome.is_failed())
            .count()
    }

    pub fn is_success(&self) -> bool {
        !self.interrupted && self.failed_count() == 0
    }

    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| anyhow::anyhow!("Failed to write report {}: {e}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_keeps_order_and_context() {
        let reporter = Reporter::new();
        assert!(!reporter.has_failed());
        reporter.fail(Phase::DuringUpgrade, "1.2.3.4:80", "first");
        reporter.fail(Phase::PostValidate, "baz", "second");
        let first = reporter.first_failure().unwrap();
        assert_eq!(first.phase, Phase::DuringUpgrade);
        assert_eq!(first.context, "1.2.3.4:80");
        assert_eq!(reporter.failures().len(), 2);
    }

    #[test]
    fn test_reporter_clones_share_state() {
        let reporter = Reporter::new();
        let background = reporter.clone();
        std::thread::spawn(move || background.fail(Phase::DuringUpgrade, "t", "boom"))
            .join()
            .unwrap();
        assert!(reporter.has_failed());
    }

    #[test]
    fn test_reporter_drain_resets() {
        let reporter = Reporter::new();
        reporter.fail(Phase::NodeUpgrade, "tmpl-A", "x");
        assert_eq!(reporter.drain().len(), 1);
        assert!(!reporter.has_failed());
    }

    #[test]
    fn test_report_write_json() {
        let now = Utc::now();
        let mut report = RunReport::default();
        report.push(ScenarioRecord {
            name: "kube-push".to_string(),
            outcome: ScenarioOutcome::Passed,
            failures: vec![],
            started_at: now,
            completed_at: now,
        });
        report.push(ScenarioRecord {
            name: "upgrade-master".to_string(),
            outcome: ScenarioOutcome::Skipped {
                reason: "not implemented for aws".to_string(),
            },
            failures: vec![],
            started_at: now,
            completed_at: now,
        });
        assert!(report.is_success());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        report.write_json(&path).unwrap();

        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["interrupted"], false);
        assert_eq!(parsed["scenarios"][0]["outcome"], "passed");
        assert_eq!(parsed["scenarios"][1]["outcome"], "skipped");
        assert_eq!(
            parsed["scenarios"][1]["reason"],
            "not implemented for aws"
        );
    }

    #[test]
    fn test_failed_outcome_carries_phase() {
        let err = KuvError::Script("exit 1".into()).in_phase(Phase::MasterUpgrade);
        let outcome = ScenarioOutcome::failed(&err);
        assert!(outcome.is_failed());
        match outcome {
            ScenarioOutcome::Failed { phase, error } => {
                assert_eq!(phase, Some(Phase::MasterUpgrade));
                assert!(error.contains("exit 1"));
            }
            _ => panic!("expected failure"),
        }
    }
}
