use pkg_state::registry::WorkloadStore;
use pkg_types::deployment::{Deployment, DeploymentStatus};
use pkg_types::replicaset::ReplicaSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ReconcileError;

/// Aggregate the observed counts of `all` into a Deployment status.
///
/// Only ReplicaSet status fields are read; the stored Deployment status is
/// never an input.
pub fn calculate_status(
    all: &[ReplicaSet],
    new_rs: Option<&ReplicaSet>,
    deploy: &Deployment,
) -> DeploymentStatus {
    let replicas: u32 = all.iter().map(|rs| rs.status.replicas).sum();
    let ready_replicas: u32 = all.iter().map(|rs| rs.status.ready_replicas).sum();
    let available_replicas: u32 = all.iter().map(|rs| rs.status.available_replicas).sum();

    DeploymentStatus {
        replicas,
        updated_replicas: new_rs.map(|rs| rs.status.replicas).unwrap_or(0),
        ready_replicas,
        available_replicas,
        unavailable_replicas: deploy.spec.replicas.saturating_sub(available_replicas),
        observed_generation: deploy.generation,
        message: None,
    }
}

/// Persists the computed status of a Deployment.
pub struct StatusSynchronizer {
    store: Arc<dyn WorkloadStore>,
}

impl StatusSynchronizer {
    pub fn new(store: Arc<dyn WorkloadStore>) -> Self {
        Self { store }
    }

    /// Compute and always write the status.
    pub async fn update(
        &self,
        all: &[ReplicaSet],
        new_rs: Option<&ReplicaSet>,
        deploy: &Deployment,
    ) -> Result<(), ReconcileError> {
        let status = calculate_status(all, new_rs, deploy);
        self.persist(deploy, status).await
    }

    /// Compute the status and write it only if it differs from what is stored.
    pub async fn sync(
        &self,
        all: &[ReplicaSet],
        new_rs: Option<&ReplicaSet>,
        deploy: &Deployment,
    ) -> Result<(), ReconcileError> {
        let status = calculate_status(all, new_rs, deploy);
        if status == deploy.status {
            debug!("Deployment {}: status unchanged", deploy.name);
            return Ok(());
        }
        self.persist(deploy, status).await
    }

    /// Surface a configuration problem on the Deployment itself.
    pub async fn record_failure(
        &self,
        deploy: &Deployment,
        message: &str,
    ) -> Result<(), ReconcileError> {
        if deploy.status.message.as_deref() == Some(message)
            && deploy.status.observed_generation == deploy.generation
        {
            return Ok(());
        }
        let mut status = deploy.status.clone();
        status.message = Some(message.to_string());
        status.observed_generation = deploy.generation;
        self.persist(deploy, status).await
    }

    async fn persist(
        &self,
        deploy: &Deployment,
        status: DeploymentStatus,
    ) -> Result<(), ReconcileError> {
        let mut updated = deploy.clone();
        updated.status = status;
        if let Err(e) = self.store.update_deployment_status(&updated).await {
            warn!("Deployment {}: failed to update status: {}", deploy.name, e);
            return Err(e.into());
        }
        Ok(())
    }
}
