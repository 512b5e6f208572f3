use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a replica count change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ScaleAction {
    ScaledUp,
    ScaledDown,
}

impl ScaleAction {
    pub fn between(from: u32, to: u32) -> Self {
        if to > from {
            ScaleAction::ScaledUp
        } else {
            ScaleAction::ScaledDown
        }
    }
}

impl std::fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleAction::ScaledUp => write!(f, "Scaled up"),
            ScaleAction::ScaledDown => write!(f, "Scaled down"),
        }
    }
}

/// Advisory record of a ReplicaSet being scaled. Written to the event sink
/// and never read back by the controller.
/// Stored at `/registry/events/<namespace>/<id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScaleEvent {
    pub id: String,
    pub namespace: String,
    /// Name of the ReplicaSet that was scaled
    pub subject: String,
    /// Name of the Deployment that scaled it
    pub deployment: String,
    pub action: ScaleAction,
    pub from_count: u32,
    pub to_count: u32,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
