//! State store key layout.

/// Prefix under which Deployments are stored: `<prefix><namespace>/<name>`.
pub const DEPLOYMENTS_PREFIX: &str = "/registry/deployments/";

/// Prefix under which ReplicaSets are stored: `<prefix><namespace>/<name>`.
pub const REPLICASETS_PREFIX: &str = "/registry/replicasets/";

/// Prefix under which scale events are stored: `<prefix><namespace>/<id>`.
pub const EVENTS_PREFIX: &str = "/registry/events/";

/// Capacity of the live watch broadcast channel.
pub const WATCH_CHANNEL_CAPACITY: usize = 1024;
