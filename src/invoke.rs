//! Action invocation: scripts and cloud CLIs run as child processes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::KuvError;

/// Captured output of a successful invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs an external action and reports success or a descriptive failure.
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<ScriptOutput, KuvError>;
}

/// Runs programs as child processes.
///
/// Relative paths containing a `/` (e.g. `hack/e2e-internal/e2e-push.sh`) are
/// resolved against the repository root; bare names go through `PATH`.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    repo_root: PathBuf,
}

impl ScriptRunner {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    fn resolve(&self, program: &str) -> PathBuf {
        let path = Path::new(program);
        if path.is_relative() && program.contains('/') {
            self.repo_root.join(path)
        } else {
            path.to_path_buf()
        }
    }
}

#[async_trait]
impl ActionInvoker for ScriptRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<ScriptOutput, KuvError> {
        info!("Running {} {:?}", program, args);

        let output = tokio::process::Command::new(self.resolve(program))
            .args(args)
            .output()
            .await
            .map_err(|e| KuvError::Script(format!("error running {program} {args:?}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(KuvError::Script(format!(
                "error running {program} {args:?}; got {}, stdout {stdout:?}, stderr {stderr:?}",
                output.status
            )));
        }

        debug!("stdout: {}", stdout);
        debug!("stderr: {}", stderr);
        Ok(ScriptOutput { stdout, stderr })
    }
}
