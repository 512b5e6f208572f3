use pkg_constants::controller::{DEFAULT_RESYNC_INTERVAL_SECS, DEFAULT_WORKERS, DEPLOYMENT_KIND};
use pkg_constants::state::{DEPLOYMENTS_PREFIX, REPLICASETS_PREFIX};
use pkg_state::registry::{StoreError, WorkloadStore};
use pkg_state::watch::{EventLog, EventType, WatchEvent};
use pkg_types::replicaset::ReplicaSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::error::ReconcileError;
use crate::events::EventRecorder;
use crate::recreate::RecreateReconciler;
use crate::workqueue::{Backoff, WorkQueue};

const MIN_RESYNC_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub workers: usize,
    /// How often every Deployment is re-enqueued regardless of watch events
    pub resync_interval: Duration,
    pub backoff: Backoff,
    pub max_scale_downs_per_pass: Option<usize>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            resync_interval: Duration::from_secs(DEFAULT_RESYNC_INTERVAL_SECS),
            backoff: Backoff::default(),
            max_scale_downs_per_pass: None,
        }
    }
}

/// Controller that rolls Deployments out onto ReplicaSets.
///
/// Deployment keys (`namespace/name`) are fed into a [`WorkQueue`] from
/// store watch events and a periodic resync; workers pull keys and run one
/// reconciliation pass each. Only the Recreate strategy is reconciled here.
pub struct DeploymentController {
    store: Arc<dyn WorkloadStore>,
    event_log: EventLog,
    reconciler: RecreateReconciler,
    queue: WorkQueue,
    config: ControllerConfig,
}

impl DeploymentController {
    pub fn new(
        store: Arc<dyn WorkloadStore>,
        recorder: Arc<dyn EventRecorder>,
        event_log: EventLog,
        mut config: ControllerConfig,
    ) -> Self {
        // tokio intervals reject a zero period
        config.resync_interval = config.resync_interval.max(MIN_RESYNC_INTERVAL);
        let reconciler = RecreateReconciler::new(store.clone(), recorder)
            .with_max_scale_downs_per_pass(config.max_scale_downs_per_pass);
        Self {
            store,
            event_log,
            reconciler,
            queue: WorkQueue::new(config.backoff.clone()),
            config,
        }
    }

    /// Handle for enqueueing keys and shutting the workers down.
    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Run until the queue is shut down.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        let controller = Arc::new(self);
        tokio::spawn(async move {
            let workers = controller.config.workers.max(1);
            info!(
                "DeploymentController started (workers={}, resync={}s)",
                workers,
                controller.config.resync_interval.as_secs()
            );

            let watcher = tokio::spawn(controller.clone().watch_loop());
            let resync = tokio::spawn(controller.clone().resync_loop());
            let handles: Vec<_> = (0..workers)
                .map(|_| tokio::spawn(controller.clone().worker_loop()))
                .collect();
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!("DeploymentController worker exited abnormally: {}", e);
                }
            }
            watcher.abort();
            resync.abort();
            info!("DeploymentController stopped");
        })
    }

    async fn watch_loop(self: Arc<Self>) {
        let mut events = Box::pin(self.event_log.watch_prefixes(vec![
            DEPLOYMENTS_PREFIX.to_string(),
            REPLICASETS_PREFIX.to_string(),
        ]));
        while let Some(event) = events.next().await {
            if let Some(key) = deployment_key_for_event(&event) {
                self.queue.add(key);
            }
        }
    }

    async fn resync_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.resync_interval);
        loop {
            interval.tick().await;
            if self.queue.is_shutting_down() {
                break;
            }
            match self.store.list_deployments().await {
                Ok(deployments) => {
                    for deploy in deployments {
                        self.queue.add(deploy.key());
                    }
                }
                Err(e) => warn!("DeploymentController resync error: {}", e),
            }
        }
    }

    async fn worker_loop(self: Arc<Self>) {
        while self.process_next().await {}
    }

    /// Take one key off the queue and reconcile it. Returns false once the
    /// queue has shut down.
    async fn process_next(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        match self.sync_deployment(&key).await {
            Ok(()) => self.queue.forget(&key),
            Err(e) if !e.is_retryable() => {
                warn!("Deployment {}: {} (not retrying)", key, e);
                self.queue.forget(&key);
            }
            Err(e) => {
                let delay = self.queue.add_rate_limited(&key);
                warn!(
                    "Deployment {}: reconcile failed (attempt {}), retrying in {:?}: {}",
                    key,
                    self.queue.num_requeues(&key),
                    delay,
                    e
                );
            }
        }
        self.queue.done(&key);
        true
    }

    /// Run one reconciliation pass for the Deployment at `key`
    /// (`namespace/name`), reading it fresh from the store.
    pub async fn sync_deployment(&self, key: &str) -> Result<(), ReconcileError> {
        let Some((ns, name)) = key.split_once('/') else {
            return Err(ReconcileError::Configuration(format!(
                "malformed deployment key '{}'",
                key
            )));
        };

        let deploy = match self.store.get_deployment(ns, name).await {
            Ok(d) => d,
            Err(StoreError::NotFound { .. }) => {
                debug!("Deployment {} no longer exists", key);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        if !deploy.is_recreate() {
            debug!("Deployment {}: not a Recreate rollout, skipping", key);
            return Ok(());
        }

        match self.reconciler.reconcile(&deploy).await {
            Ok(outcome) => {
                debug!("Deployment {}: pass finished ({:?})", key, outcome);
                Ok(())
            }
            Err(ReconcileError::Configuration(message)) => {
                // Already logged by the synchronizer on failure
                let _ = self
                    .reconciler
                    .status()
                    .record_failure(&deploy, &message)
                    .await;
                Err(ReconcileError::Configuration(message))
            }
            Err(e) => Err(e),
        }
    }
}

/// The Deployment key a watch event concerns, if any.
///
/// ReplicaSet events map to their controlling Deployment; deleted
/// ReplicaSets carry no value and are left to the periodic resync.
pub fn deployment_key_for_event(event: &WatchEvent) -> Option<String> {
    if let Some(rest) = event.key.strip_prefix(DEPLOYMENTS_PREFIX) {
        return rest.contains('/').then(|| rest.to_string());
    }
    if event.key.starts_with(REPLICASETS_PREFIX) && event.event_type == EventType::Put {
        let rs: ReplicaSet = serde_json::from_slice(event.value.as_deref()?).ok()?;
        let owner = rs.controller_ref()?;
        if owner.kind == DEPLOYMENT_KIND {
            return Some(format!("{}/{}", rs.namespace, owner.name));
        }
    }
    None
}
