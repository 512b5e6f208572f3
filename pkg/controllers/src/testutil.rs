//! Fixtures shared by the controller tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use pkg_state::client::StateStore;
use pkg_state::registry::{Registry, StoreError, WorkloadStore, replicaset_key};
use pkg_types::deployment::{Deployment, DeploymentSpec, DeploymentStatus, DeploymentStrategy};
use pkg_types::event::ScaleEvent;
use pkg_types::pod::{ContainerSpec, PodSpec, PodTemplate};
use pkg_types::replicaset::{OwnerReference, ReplicaSet, ReplicaSetSpec, ReplicaSetStatus};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::events::EventRecorder;

pub fn make_deployment(name: &str, replicas: u32, image: &str) -> Deployment {
    let labels = BTreeMap::from([("app".to_string(), name.to_string())]);
    Deployment {
        id: format!("{}-uid", name),
        name: name.to_string(),
        namespace: "default".to_string(),
        spec: DeploymentSpec {
            replicas,
            template: PodTemplate {
                labels: labels.clone(),
                spec: PodSpec {
                    containers: vec![ContainerSpec {
                        name: name.to_string(),
                        image: image.to_string(),
                        command: vec![],
                        args: vec![],
                        env: BTreeMap::new(),
                        resources: Default::default(),
                    }],
                    ..Default::default()
                },
            },
            strategy: DeploymentStrategy::Recreate,
            selector: labels,
            revision_history_limit: None,
        },
        status: DeploymentStatus::default(),
        generation: 1,
        resource_version: 0,
        created_at: Utc::now(),
    }
}

/// A ReplicaSet controlled by `deploy`, created `age_secs` ago, with every
/// observed count set to `observed`.
pub fn make_rs(
    deploy: &Deployment,
    name: &str,
    hash: &str,
    desired: u32,
    observed: u32,
    age_secs: i64,
) -> ReplicaSet {
    ReplicaSet {
        id: format!("{}-id", name),
        name: name.to_string(),
        namespace: deploy.namespace.clone(),
        spec: ReplicaSetSpec {
            replicas: desired,
            selector: deploy.spec.selector.clone(),
            template: deploy.spec.template.clone(),
        },
        status: ReplicaSetStatus {
            replicas: observed,
            ready_replicas: observed,
            available_replicas: observed,
        },
        owner_references: vec![OwnerReference {
            kind: "Deployment".to_string(),
            name: deploy.name.clone(),
            uid: deploy.id.clone(),
            controller: true,
        }],
        template_hash: hash.to_string(),
        resource_version: 0,
        created_at: Utc::now() - Duration::seconds(age_secs),
    }
}

/// Store `deploy` and `rss` directly in the registry, bypassing call
/// recording, and return the stored deployment.
pub async fn seed(store: &TestStore, deploy: Deployment, rss: Vec<ReplicaSet>) -> Deployment {
    let deploy = store.registry.apply_deployment(deploy).await.unwrap();
    for rs in rss {
        let (ns, name, status) = (rs.namespace.clone(), rs.name.clone(), rs.status.clone());
        store.registry.create_replicaset(rs).await.unwrap();
        store
            .registry
            .apply_replicaset_status(&ns, &name, status)
            .await
            .unwrap();
    }
    deploy
}

/// A successful mutating call seen by [`TestStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create(String),
    Scale(String, u32),
    Delete(String),
    Status(String),
}

/// [`WorkloadStore`] over an in-memory [`Registry`] that records successful
/// mutations and can be told to fail.
pub struct TestStore {
    pub registry: Registry,
    calls: Mutex<Vec<Call>>,
    conflict_on: Mutex<Option<String>>,
    not_found_on: Mutex<Option<String>>,
    unavailable: AtomicBool,
}

impl TestStore {
    pub async fn new() -> Arc<Self> {
        let state = StateStore::in_memory().await.unwrap();
        Arc::new(Self {
            registry: Registry::new(state),
            calls: Mutex::new(Vec::new()),
            conflict_on: Mutex::new(None),
            not_found_on: Mutex::new(None),
            unavailable: AtomicBool::new(false),
        })
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_mutations(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    /// Updates of the named ReplicaSet fail with a version conflict.
    pub fn conflict_on(&self, name: &str) {
        *self.conflict_on.lock().unwrap() = Some(name.to_string());
    }

    /// The named ReplicaSet is deleted when it is next updated, and the
    /// update fails with NotFound.
    pub fn not_found_on(&self, name: &str) {
        *self.not_found_on.lock().unwrap() = Some(name.to_string());
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl WorkloadStore for TestStore {
    async fn get_deployment(&self, ns: &str, name: &str) -> Result<Deployment, StoreError> {
        self.check_available()?;
        self.registry.get_deployment(ns, name).await
    }

    async fn list_deployments(&self) -> Result<Vec<Deployment>, StoreError> {
        self.check_available()?;
        self.registry.list_deployments().await
    }

    async fn get_replicaset(&self, ns: &str, name: &str) -> Result<ReplicaSet, StoreError> {
        self.check_available()?;
        self.registry.get_replicaset(ns, name).await
    }

    async fn list_replicasets(
        &self,
        ns: &str,
        owner_uid: &str,
    ) -> Result<Vec<ReplicaSet>, StoreError> {
        self.check_available()?;
        self.registry.list_replicasets(ns, owner_uid).await
    }

    async fn create_replicaset(&self, rs: ReplicaSet) -> Result<ReplicaSet, StoreError> {
        self.check_available()?;
        let name = rs.name.clone();
        let created = self.registry.create_replicaset(rs).await?;
        self.record(Call::Create(name));
        Ok(created)
    }

    async fn update_replicaset(&self, rs: ReplicaSet) -> Result<ReplicaSet, StoreError> {
        self.check_available()?;
        if self.conflict_on.lock().unwrap().as_deref() == Some(rs.name.as_str()) {
            return Err(StoreError::Conflict {
                key: rs.name.clone(),
                expected: rs.resource_version,
                found: rs.resource_version + 1,
            });
        }
        if self.not_found_on.lock().unwrap().as_deref() == Some(rs.name.as_str()) {
            // Deleted by someone else between our list and this update
            let key = replicaset_key(&rs.namespace, &rs.name);
            self.registry.state().delete(&key).await?;
            return Err(StoreError::NotFound {
                kind: "ReplicaSet",
                key: rs.name.clone(),
            });
        }
        let call = Call::Scale(rs.name.clone(), rs.spec.replicas);
        let updated = self.registry.update_replicaset(rs).await?;
        self.record(call);
        Ok(updated)
    }

    async fn delete_replicaset(&self, rs: &ReplicaSet) -> Result<(), StoreError> {
        self.check_available()?;
        self.registry.delete_replicaset(rs).await?;
        self.record(Call::Delete(rs.name.clone()));
        Ok(())
    }

    async fn update_deployment_status(
        &self,
        deploy: &Deployment,
    ) -> Result<Deployment, StoreError> {
        self.check_available()?;
        let updated = self.registry.update_deployment_status(deploy).await?;
        self.record(Call::Status(deploy.name.clone()));
        Ok(updated)
    }
}

/// Keeps recorded events in memory, or rejects them all.
pub struct MemoryRecorder {
    events: Mutex<Vec<ScaleEvent>>,
    fail: bool,
}

impl MemoryRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn events(&self) -> Vec<ScaleEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventRecorder for MemoryRecorder {
    async fn record(&self, event: ScaleEvent) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("event sink rejected {}", event.id);
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}
