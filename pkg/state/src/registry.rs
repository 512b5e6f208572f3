//! Typed access to workload objects with optimistic concurrency.
//!
//! Every object carries a `resource_version` that the registry bumps on each
//! write. Conditional writes compare the caller's version against the stored
//! one and fail with [`StoreError::Conflict`] instead of overwriting.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;

use pkg_constants::state::{DEPLOYMENTS_PREFIX, REPLICASETS_PREFIX};
use pkg_types::deployment::Deployment;
use pkg_types::replicaset::{ReplicaSet, ReplicaSetStatus};

use crate::client::StateStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("conflict writing {key}: expected version {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("state store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode or decode stored object: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<anyhow::Error> for StoreError {
    fn from(e: anyhow::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

pub fn deployment_key(ns: &str, name: &str) -> String {
    format!("{}{}/{}", DEPLOYMENTS_PREFIX, ns, name)
}

pub fn replicaset_key(ns: &str, name: &str) -> String {
    format!("{}{}/{}", REPLICASETS_PREFIX, ns, name)
}

/// Storage operations the deployment controller depends on.
///
/// Mutations are conditional on the `resource_version` of the object passed
/// in and never blindly overwrite.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn get_deployment(&self, ns: &str, name: &str) -> Result<Deployment, StoreError>;

    async fn list_deployments(&self) -> Result<Vec<Deployment>, StoreError>;

    async fn get_replicaset(&self, ns: &str, name: &str) -> Result<ReplicaSet, StoreError>;

    /// ReplicaSets in `ns` whose controlling owner has `owner_uid`.
    async fn list_replicasets(
        &self,
        ns: &str,
        owner_uid: &str,
    ) -> Result<Vec<ReplicaSet>, StoreError>;

    async fn create_replicaset(&self, rs: ReplicaSet) -> Result<ReplicaSet, StoreError>;

    async fn update_replicaset(&self, rs: ReplicaSet) -> Result<ReplicaSet, StoreError>;

    async fn delete_replicaset(&self, rs: &ReplicaSet) -> Result<(), StoreError>;

    /// Write `deploy.status` only, leaving the stored spec untouched.
    async fn update_deployment_status(&self, deploy: &Deployment)
    -> Result<Deployment, StoreError>;
}

/// [`WorkloadStore`] over the SlateDB [`StateStore`].
///
/// Read-check-write sequences are serialized under one async mutex, which is
/// what makes the version comparison atomic for this single-process store.
#[derive(Clone)]
pub struct Registry {
    store: StateStore,
    write_lock: Arc<Mutex<()>>,
}

impl Registry {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.store
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        match self.store.get(key).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let data = serde_json::to_vec(value)?;
        self.store.put(key, &data).await?;
        Ok(())
    }

    /// Create or replace a Deployment the way an API server would: the
    /// stored status is preserved and `generation` is bumped when the spec
    /// changes.
    pub async fn apply_deployment(&self, mut deploy: Deployment) -> Result<Deployment, StoreError> {
        let _guard = self.write_lock.lock().await;
        let key = deployment_key(&deploy.namespace, &deploy.name);
        match self.read::<Deployment>(&key).await? {
            Some(current) => {
                deploy.generation = if current.spec == deploy.spec {
                    current.generation
                } else {
                    current.generation + 1
                };
                deploy.status = current.status;
                deploy.resource_version = current.resource_version + 1;
            }
            None => {
                deploy.generation = deploy.generation.max(1);
                deploy.resource_version = 1;
            }
        }
        self.write(&key, &deploy).await?;
        Ok(deploy)
    }

    /// Record observed replica counts, as the pod-owning controller does.
    pub async fn apply_replicaset_status(
        &self,
        ns: &str,
        name: &str,
        status: ReplicaSetStatus,
    ) -> Result<ReplicaSet, StoreError> {
        let _guard = self.write_lock.lock().await;
        let key = replicaset_key(ns, name);
        let mut rs: ReplicaSet = self.read(&key).await?.ok_or(StoreError::NotFound {
            kind: "ReplicaSet",
            key: key.clone(),
        })?;
        rs.status = status;
        rs.resource_version += 1;
        self.write(&key, &rs).await?;
        Ok(rs)
    }
}

#[async_trait]
impl WorkloadStore for Registry {
    async fn get_deployment(&self, ns: &str, name: &str) -> Result<Deployment, StoreError> {
        let key = deployment_key(ns, name);
        self.read(&key).await?.ok_or(StoreError::NotFound {
            kind: "Deployment",
            key,
        })
    }

    async fn list_deployments(&self) -> Result<Vec<Deployment>, StoreError> {
        let entries = self.store.list_prefix(DEPLOYMENTS_PREFIX).await?;
        entries
            .into_iter()
            .map(|(_, v)| serde_json::from_slice(&v).map_err(StoreError::from))
            .collect()
    }

    async fn get_replicaset(&self, ns: &str, name: &str) -> Result<ReplicaSet, StoreError> {
        let key = replicaset_key(ns, name);
        self.read(&key).await?.ok_or(StoreError::NotFound {
            kind: "ReplicaSet",
            key,
        })
    }

    async fn list_replicasets(
        &self,
        ns: &str,
        owner_uid: &str,
    ) -> Result<Vec<ReplicaSet>, StoreError> {
        let prefix = format!("{}{}/", REPLICASETS_PREFIX, ns);
        let entries = self.store.list_prefix(&prefix).await?;
        // Any entry that fails to decode could be owned by `owner_uid`
        let mut owned = Vec::new();
        for (_, v) in entries {
            let rs: ReplicaSet = serde_json::from_slice(&v)?;
            if rs.is_controlled_by(owner_uid) {
                owned.push(rs);
            }
        }
        Ok(owned)
    }

    async fn create_replicaset(&self, mut rs: ReplicaSet) -> Result<ReplicaSet, StoreError> {
        let _guard = self.write_lock.lock().await;
        let key = replicaset_key(&rs.namespace, &rs.name);
        if self.store.get(&key).await?.is_some() {
            return Err(StoreError::AlreadyExists {
                kind: "ReplicaSet",
                key,
            });
        }
        rs.resource_version = 1;
        self.write(&key, &rs).await?;
        Ok(rs)
    }

    async fn update_replicaset(&self, mut rs: ReplicaSet) -> Result<ReplicaSet, StoreError> {
        let _guard = self.write_lock.lock().await;
        let key = replicaset_key(&rs.namespace, &rs.name);
        let current: ReplicaSet = self.read(&key).await?.ok_or(StoreError::NotFound {
            kind: "ReplicaSet",
            key: key.clone(),
        })?;
        if current.resource_version != rs.resource_version {
            return Err(StoreError::Conflict {
                key,
                expected: rs.resource_version,
                found: current.resource_version,
            });
        }
        rs.resource_version += 1;
        self.write(&key, &rs).await?;
        Ok(rs)
    }

    async fn delete_replicaset(&self, rs: &ReplicaSet) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let key = replicaset_key(&rs.namespace, &rs.name);
        let current: ReplicaSet = self.read(&key).await?.ok_or(StoreError::NotFound {
            kind: "ReplicaSet",
            key: key.clone(),
        })?;
        if current.resource_version != rs.resource_version {
            return Err(StoreError::Conflict {
                key,
                expected: rs.resource_version,
                found: current.resource_version,
            });
        }
        self.store.delete(&key).await?;
        Ok(())
    }

    async fn update_deployment_status(
        &self,
        deploy: &Deployment,
    ) -> Result<Deployment, StoreError> {
        let _guard = self.write_lock.lock().await;
        let key = deployment_key(&deploy.namespace, &deploy.name);
        let mut current: Deployment = self.read(&key).await?.ok_or(StoreError::NotFound {
            kind: "Deployment",
            key: key.clone(),
        })?;
        if current.resource_version != deploy.resource_version {
            return Err(StoreError::Conflict {
                key,
                expected: deploy.resource_version,
                found: current.resource_version,
            });
        }
        current.status = deploy.status.clone();
        current.resource_version += 1;
        self.write(&key, &current).await?;
        Ok(current)
    }
}
