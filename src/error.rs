//! Custom error types for kuv.

use std::time::Duration;

use thiserror::Error;

use crate::probe::ProbeOutcome;

/// Scenario phase a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    PreValidate,
    MasterUpgrade,
    DuringUpgrade,
    NodeUpgrade,
    PostValidate,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreValidate => write!(f, "pre-validate"),
            Self::MasterUpgrade => write!(f, "master-upgrade"),
            Self::DuringUpgrade => write!(f, "during-upgrade"),
            Self::NodeUpgrade => write!(f, "node-upgrade"),
            Self::PostValidate => write!(f, "post-validate"),
        }
    }
}

/// Step of a rolling node update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollingStep {
    AcquireTemplate,
    RollingReplace,
    NodesReady,
    PodsReady,
}

impl std::fmt::Display for RollingStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AcquireTemplate => write!(f, "acquire node template"),
            Self::RollingReplace => write!(f, "rolling replace"),
            Self::NodesReady => write!(f, "wait for nodes ready"),
            Self::PodsReady => write!(f, "wait for pods ready"),
        }
    }
}

/// Post-condition checked by the cluster validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    ReplicaSetCount,
    ReplicaSetName,
    PodReadiness,
    ServiceExists,
    ServiceName,
    IngressReachable,
}

impl std::fmt::Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReplicaSetCount => write!(f, "replica-set count"),
            Self::ReplicaSetName => write!(f, "replica-set name"),
            Self::PodReadiness => write!(f, "pod readiness"),
            Self::ServiceExists => write!(f, "service exists"),
            Self::ServiceName => write!(f, "service name"),
            Self::IngressReachable => write!(f, "ingress reachable"),
        }
    }
}

/// Errors that can occur while supervising a cluster upgrade.
#[derive(Error, Debug)]
pub enum KuvError {
    #[error("Failed to contact service {target} during upgrade: no healthy response within {budget:?} (last: {last})")]
    ValidationWindow {
        target: String,
        budget: Duration,
        last: ProbeOutcome,
    },

    #[error("{action} failed: {message}")]
    Action { action: String, message: String },

    #[error("Rolling update step '{step}' failed for template {template}: {message}")]
    RollingUpdate {
        step: RollingStep,
        template: String,
        message: String,
    },

    #[error("{check} check failed: {detail} (expected {expected}, observed {observed})")]
    PostCondition {
        check: Check,
        detail: String,
        expected: String,
        observed: String,
    },

    #[error("Timeout waiting for {operation}: {details}")]
    Timeout { operation: String, details: String },

    #[error("Kubernetes API error: {0}")]
    KubernetesApi(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Validation task error: {0}")]
    Task(String),

    #[error("[{phase}] {source}")]
    Phase {
        phase: Phase,
        #[source]
        source: Box<KuvError>,
    },
}

impl KuvError {
    /// Attribute this error to a scenario phase.
    ///
    /// An error that already carries a phase keeps its original one.
    #[must_use]
    pub fn in_phase(self, phase: Phase) -> Self {
        match self {
            Self::Phase { .. } => self,
            other => Self::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// The phase this error is attributed to, if any.
    pub const fn phase(&self) -> Option<Phase> {
        match self {
            Self::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The failed post-condition check, looking through phase wrappers.
    pub fn failed_check(&self) -> Option<Check> {
        match self {
            Self::PostCondition { check, .. } => Some(*check),
            Self::Phase { source, .. } => source.failed_check(),
            _ => None,
        }
    }

    /// Returns true if this error is transient and a caller may retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::KubernetesApi(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_post_condition() {
        let err = KuvError::PostCondition {
            check: Check::ReplicaSetCount,
            detail: "wanted 1 RC, got 0".to_string(),
            expected: "1".to_string(),
            observed: "0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "replica-set count check failed: wanted 1 RC, got 0 (expected 1, observed 0)"
        );
    }

    #[test]
    fn test_error_display_timeout() {
        let err = KuvError::Timeout {
            operation: "nodes ready".to_string(),
            details: "2/3 ready after 600s".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Timeout waiting for nodes ready: 2/3 ready after 600s"
        );
    }

    #[test]
    fn test_error_display_rolling_update() {
        let err = KuvError::RollingUpdate {
            step: RollingStep::RollingReplace,
            template: "tmpl-B".to_string(),
            message: "gcloud exited 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Rolling update step 'rolling replace' failed for template tmpl-B: gcloud exited 1"
        );
    }

    #[test]
    fn test_in_phase_wraps_once() {
        let err = KuvError::KubernetesApi("boom".to_string())
            .in_phase(Phase::PostValidate)
            .in_phase(Phase::NodeUpgrade);
        assert_eq!(err.phase(), Some(Phase::PostValidate));
        assert_eq!(err.to_string(), "[post-validate] Kubernetes API error: boom");
    }

    #[test]
    fn test_failed_check_through_phase() {
        let err = KuvError::PostCondition {
            check: Check::PodReadiness,
            detail: "1 of 2 pods ready".to_string(),
            expected: "2".to_string(),
            observed: "1".to_string(),
        }
        .in_phase(Phase::PreValidate);
        assert_eq!(err.failed_check(), Some(Check::PodReadiness));
        assert_eq!(KuvError::Script("x".into()).failed_check(), None);
    }

    #[test]
    fn test_is_transient() {
        assert!(KuvError::KubernetesApi("z".into()).is_transient());
        assert!(!KuvError::Config("x".into()).is_transient());
        assert!(
            !KuvError::Action {
                action: "master upgrade".into(),
                message: "exit 1".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::DuringUpgrade.to_string(), "during-upgrade");
        assert_eq!(Phase::NodeUpgrade.to_string(), "node-upgrade");
    }
}
