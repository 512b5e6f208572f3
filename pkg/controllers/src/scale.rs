use pkg_state::registry::WorkloadStore;
use pkg_types::deployment::Deployment;
use pkg_types::replicaset::ReplicaSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::events::{EventRecorder, scale_event};

/// Applies replica count changes to ReplicaSets, one conditional write each.
pub struct ScalingExecutor {
    store: Arc<dyn WorkloadStore>,
    recorder: Arc<dyn EventRecorder>,
}

impl ScalingExecutor {
    pub fn new(store: Arc<dyn WorkloadStore>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self { store, recorder }
    }

    /// Set `rs` to `target` desired replicas.
    ///
    /// Returns `(false, rs)` untouched when the count already matches. Store
    /// errors, including version conflicts, are returned as-is; the event is
    /// only recorded after a successful write and its failure is ignored.
    pub async fn scale_replica_set_and_record_event(
        &self,
        rs: &ReplicaSet,
        target: u32,
        deploy: &Deployment,
    ) -> Result<(bool, ReplicaSet), ReconcileError> {
        let from = rs.spec.replicas;
        if from == target {
            debug!("RS {}: already at {} replicas", rs.name, target);
            return Ok((false, rs.clone()));
        }

        let mut desired = rs.clone();
        desired.spec.replicas = target;
        let updated = self.store.update_replicaset(desired).await?;

        let event = scale_event(&updated, deploy, from, target);
        info!("Deployment {}: {}", deploy.name, event.message);
        if let Err(e) = self.recorder.record(event).await {
            warn!(
                "Deployment {}: failed to record scale event for RS {}: {}",
                deploy.name, updated.name, e
            );
        }
        Ok((true, updated))
    }
}
