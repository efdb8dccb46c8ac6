//! Background availability validation around a disruptive action.
//!
//! A [`ValidationRun`] probes the target in a spawned task from before the
//! action starts until the caller stops and joins it. The caller must always
//! `stop()` and then `join()`, on the failure path too.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{KuvError, Phase};
use crate::probe::{Probe, ProbeOutcome, Target, poll_until_healthy};
use crate::report::Reporter;

/// Default wait between probes inside one window.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default time a window may go without a healthy response.
pub const DEFAULT_WINDOW_BUDGET: Duration = Duration::from_secs(5 * 60);

/// Default pause between windows; bounds the latency of `stop()`.
pub const DEFAULT_ITERATION_PERIOD: Duration = Duration::from_millis(200);

/// Timing of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorSettings {
    pub poll_interval: Duration,
    pub window_budget: Duration,
    pub iteration_period: Duration,
}

impl Default for ValidatorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            window_budget: DEFAULT_WINDOW_BUDGET,
            iteration_period: DEFAULT_ITERATION_PERIOD,
        }
    }
}

/// Counters collected by the background loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub windows: u32,
    pub probes: u32,
    pub failed_windows: u32,
}

/// Terminal failure of a run: a window expired without a healthy response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowFailure {
    pub budget: Duration,
    pub last: ProbeOutcome,
}

/// Handle to a running background validation loop.
pub struct ValidationRun {
    target: Target,
    cancel: CancellationToken,
    stopped: bool,
    handle: Option<JoinHandle<ValidationSummary>>,
    terminal: Arc<OnceLock<WindowFailure>>,
}

impl ValidationRun {
    /// Spawn the validation loop and wait until it has started probing.
    pub async fn start(
        probe: Arc<dyn Probe>,
        target: Target,
        settings: ValidatorSettings,
        reporter: Reporter,
    ) -> Self {
        info!(
            target = %target,
            poll_interval_ms = u64::try_from(settings.poll_interval.as_millis()).unwrap_or(u64::MAX),
            window_budget_secs = settings.window_budget.as_secs(),
            "Starting async validation"
        );

        let cancel = CancellationToken::new();
        let terminal = Arc::new(OnceLock::new());
        let (started_tx, started_rx) = oneshot::channel();

        let handle = tokio::spawn(run_loop(
            probe,
            target.clone(),
            settings,
            reporter,
            cancel.clone(),
            Arc::clone(&terminal),
            started_tx,
        ));

        // The loop signals before its first probe so coverage starts before the action does.
        started_rx.await.ok();

        Self {
            target,
            cancel,
            stopped: false,
            handle: Some(handle),
            terminal,
        }
    }

    /// Ask the loop to exit after its current iteration.
    ///
    /// An in-flight probe window is not interrupted. Calling this twice is a no-op.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        info!(target = %self.target, "Stopping async validation");
        self.cancel.cancel();
        self.stopped = true;
    }

    /// Whether a window has already failed. Observable before `join`.
    pub fn is_failed(&self) -> bool {
        self.terminal.get().is_some()
    }

    /// Wait for the loop to exit and return its verdict.
    pub async fn join(mut self) -> Result<ValidationSummary, KuvError> {
        if !self.stopped {
            warn!(
                target = %self.target,
                "Validation joined before stop; signalling cancellation first"
            );
            self.stop();
        }

        let summary = match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| KuvError::Task(format!("validation loop for {}: {e}", self.target)))?,
            None => ValidationSummary::default(),
        };

        debug!(
            target = %self.target,
            windows = summary.windows,
            probes = summary.probes,
            failed_windows = summary.failed_windows,
            "Async validation joined"
        );

        match self.terminal.get() {
            Some(failure) => Err(KuvError::ValidationWindow {
                target: self.target.to_string(),
                budget: failure.budget,
                last: failure.last.clone(),
            }),
            None => Ok(summary),
        }
    }
}

impl Drop for ValidationRun {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Never outlive the scope that started the run.
            self.cancel.cancel();
        }
    }
}

async fn run_loop(
    probe: Arc<dyn Probe>,
    target: Target,
    settings: ValidatorSettings,
    reporter: Reporter,
    cancel: CancellationToken,
    terminal: Arc<OnceLock<WindowFailure>>,
    started: oneshot::Sender<()>,
) -> ValidationSummary {
    let mut summary = ValidationSummary::default();
    let _ = started.send(());

    while !cancel.is_cancelled() {
        let result = poll_until_healthy(
            probe.as_ref(),
            &target,
            settings.poll_interval,
            settings.window_budget,
        )
        .await;
        summary.windows += 1;
        summary.probes += result.attempts;

        if !result.is_healthy() {
            summary.failed_windows += 1;
            let failure = WindowFailure {
                budget: settings.window_budget,
                last: result.outcome,
            };
            let message = format!(
                "Failed to contact service during master upgrade: no healthy response from {} within {:?} ({} probes, last: {})",
                target, failure.budget, result.attempts, failure.last
            );

            if terminal.set(failure).is_ok() {
                // Raised off the supervising task, so log the cause before failing.
                error!(target = %target, attempts = result.attempts, "{}", message);
                reporter.fail(Phase::DuringUpgrade, target.to_string(), message);
            } else {
                warn!(target = %target, "{} (verdict already raised)", message);
            }
        }

        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(settings.iteration_period) => {}
        }
    }

    summary
}
