//! Advisory cleanup of the node template replaced by an upgrade.

use tracing::{info, warn};

use crate::nodepool::NodePool;

/// What cleanup did with the pre-upgrade template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The pool still builds nodes from the old template.
    StillInUse { template: String },
    Deleted { template: String },
    /// The old template may still exist and nobody owns it.
    PossibleLeak { template: String, reason: String },
}

/// Delete `before` if the pool moved off it. Never fails.
pub async fn cleanup_node_template(pool: &dyn NodePool, before: &str) -> CleanupOutcome {
    info!("Cleaning up any unused node templates");

    let after = match pool.current_template().await {
        Ok(after) => after,
        Err(e) => {
            warn!(
                "Could not get node template post-upgrade; may have leaked template {}: {}",
                before, e
            );
            return CleanupOutcome::PossibleLeak {
                template: before.to_string(),
                reason: e.to_string(),
            };
        }
    };

    if after == before {
        // The node upgrade never replaced anything.
        info!("Node template {} is still in use; not cleaning up", before);
        return CleanupOutcome::StillInUse {
            template: before.to_string(),
        };
    }

    match pool.delete_template(before).await {
        Ok(()) => CleanupOutcome::Deleted {
            template: before.to_string(),
        },
        Err(e) => {
            warn!("Deleting node template {} failed: {}", before, e);
            warn!("May have leaked {}", before);
            CleanupOutcome::PossibleLeak {
                template: before.to_string(),
                reason: e.to_string(),
            }
        }
    }
}
