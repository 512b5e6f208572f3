use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pod::PodTemplate;

// --- Deployment strategy ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeploymentStrategy {
    RollingUpdate {
        #[serde(default = "default_max_surge")]
        max_surge: u32,
        #[serde(default = "default_max_unavailable")]
        max_unavailable: u32,
    },
    /// Scale every old ReplicaSet to zero before the new one is scaled up.
    Recreate,
}

fn default_max_surge() -> u32 {
    1
}
fn default_max_unavailable() -> u32 {
    0
}

impl Default for DeploymentStrategy {
    fn default() -> Self {
        DeploymentStrategy::RollingUpdate {
            max_surge: 1,
            max_unavailable: 0,
        }
    }
}

// --- Deployment status ---

/// Externally visible projection of the owned ReplicaSets. Never read back
/// by the controller to make scaling decisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentStatus {
    /// Observed pods across all owned ReplicaSets
    #[serde(default)]
    pub replicas: u32,
    /// Observed pods of the ReplicaSet matching the current template
    #[serde(default)]
    pub updated_replicas: u32,
    #[serde(default)]
    pub ready_replicas: u32,
    #[serde(default)]
    pub available_replicas: u32,
    /// Desired replicas minus available, floored at zero
    #[serde(default)]
    pub unavailable_replicas: u32,
    /// Last generation the controller acted on
    #[serde(default)]
    pub observed_generation: u64,
    /// Set when the spec cannot be reconciled as written
    #[serde(default)]
    pub message: Option<String>,
}

// --- Deployment spec ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentSpec {
    pub replicas: u32,
    pub template: PodTemplate,
    #[serde(default)]
    pub strategy: DeploymentStrategy,
    /// Label selector for matching pods
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    /// How many fully scaled-down old ReplicaSets to retain. `None` keeps all.
    #[serde(default)]
    pub revision_history_limit: Option<u32>,
}

// --- Deployment ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deployment {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub spec: DeploymentSpec,
    #[serde(default)]
    pub status: DeploymentStatus,
    /// Monotonically increasing generation; bumped on spec changes
    #[serde(default)]
    pub generation: u64,
    /// Store-maintained version, bumped on every write
    #[serde(default)]
    pub resource_version: u64,
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    /// The work-queue key for this deployment: `namespace/name`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_recreate(&self) -> bool {
        self.spec.strategy == DeploymentStrategy::Recreate
    }
}
