use pkg_state::registry::WorkloadStore;
use pkg_types::deployment::Deployment;
use pkg_types::replicaset::ReplicaSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::ReconcileError;

/// Trims old ReplicaSets beyond a Deployment's revision history limit.
pub struct CleanupPolicy {
    store: Arc<dyn WorkloadStore>,
}

impl CleanupPolicy {
    pub fn new(store: Arc<dyn WorkloadStore>) -> Self {
        Self { store }
    }

    /// Delete the oldest drained ReplicaSets in excess of the limit and
    /// return how many were removed.
    ///
    /// A ReplicaSet with desired or observed replicas is never deleted, even
    /// when it is over the limit. It still counts against the excess, so the
    /// next-oldest drained one is not taken in its place.
    pub async fn cleanup(
        &self,
        old: &[ReplicaSet],
        deploy: &Deployment,
    ) -> Result<usize, ReconcileError> {
        let Some(limit) = deploy.spec.revision_history_limit else {
            return Ok(0);
        };
        let excess = old.len().saturating_sub(limit as usize);
        if excess == 0 {
            return Ok(0);
        }

        let mut by_age: Vec<&ReplicaSet> = old.iter().collect();
        by_age.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));

        let mut deleted = 0;
        for rs in by_age.into_iter().take(excess) {
            if !rs.is_drained() {
                debug!(
                    "Deployment {}: keeping RS {} (desired={}, observed={})",
                    deploy.name, rs.name, rs.spec.replicas, rs.status.replicas
                );
                continue;
            }
            match self.store.delete_replicaset(rs).await {
                Ok(()) => {
                    info!("Deployment {}: deleted old RS {}", deploy.name, rs.name);
                    deleted += 1;
                }
                Err(e) => {
                    let e = ReconcileError::from(e);
                    if !e.is_not_found() {
                        return Err(e);
                    }
                    debug!("Deployment {}: RS {} already gone", deploy.name, rs.name);
                }
            }
        }
        Ok(deleted)
    }
}
