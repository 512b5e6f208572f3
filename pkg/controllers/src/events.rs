use async_trait::async_trait;
use chrono::Utc;
use pkg_constants::controller::SCALING_REPLICA_SET_REASON;
use pkg_constants::state::EVENTS_PREFIX;
use pkg_state::client::StateStore;
use pkg_types::deployment::Deployment;
use pkg_types::event::{ScaleAction, ScaleEvent};
use pkg_types::replicaset::ReplicaSet;
use uuid::Uuid;

/// Sink for advisory scale events. Recording is best-effort: callers log a
/// failure and carry on.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, event: ScaleEvent) -> anyhow::Result<()>;
}

/// Persists events under `/registry/events/<namespace>/<id>`.
#[derive(Clone)]
pub struct StoreEventRecorder {
    store: StateStore,
}

impl StoreEventRecorder {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EventRecorder for StoreEventRecorder {
    async fn record(&self, event: ScaleEvent) -> anyhow::Result<()> {
        let key = format!("{}{}/{}", EVENTS_PREFIX, event.namespace, event.id);
        let data = serde_json::to_vec(&event)?;
        self.store.put(&key, &data).await
    }
}

/// Build the event describing `rs` moving from `from` to `to` replicas.
pub fn scale_event(rs: &ReplicaSet, deploy: &Deployment, from: u32, to: u32) -> ScaleEvent {
    let action = ScaleAction::between(from, to);
    ScaleEvent {
        id: Uuid::new_v4().to_string(),
        namespace: rs.namespace.clone(),
        subject: rs.name.clone(),
        deployment: deploy.name.clone(),
        action,
        from_count: from,
        to_count: to,
        reason: SCALING_REPLICA_SET_REASON.to_string(),
        message: format!("{} replica set {} from {} to {}", action, rs.name, from, to),
        timestamp: Utc::now(),
    }
}
