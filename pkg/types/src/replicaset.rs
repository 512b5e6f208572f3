use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pod::PodTemplate;

// --- Owner reference ---

/// Points from a ReplicaSet back to the object that manages it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    /// The owner's `id`
    pub uid: String,
    /// True for the single owner that actively manages this object
    #[serde(default)]
    pub controller: bool,
}

// --- ReplicaSet status ---

/// Observed counts, written by whoever runs the pods.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaSetStatus {
    pub replicas: u32,
    pub ready_replicas: u32,
    pub available_replicas: u32,
}

// --- ReplicaSet spec ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaSetSpec {
    pub replicas: u32,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
    pub template: PodTemplate,
}

// --- ReplicaSet ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaSet {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub spec: ReplicaSetSpec,
    #[serde(default)]
    pub status: ReplicaSetStatus,
    #[serde(default)]
    pub owner_references: Vec<OwnerReference>,
    /// Template hash for tracking which spec version this RS represents
    #[serde(default)]
    pub template_hash: String,
    /// Store-maintained version, bumped on every write
    #[serde(default)]
    pub resource_version: u64,
    pub created_at: DateTime<Utc>,
}

impl ReplicaSet {
    /// The owner reference flagged as controller, if any.
    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    /// Whether the object with `uid` is this ReplicaSet's controller.
    pub fn is_controlled_by(&self, uid: &str) -> bool {
        self.controller_ref().is_some_and(|r| r.uid == uid)
    }

    /// Desired or observed replicas are still outstanding.
    pub fn is_active(&self) -> bool {
        self.spec.replicas > 0 || self.status.replicas > 0
    }

    /// Both desired and observed replicas have reached zero.
    pub fn is_drained(&self) -> bool {
        self.spec.replicas == 0 && self.status.replicas == 0
    }
}
