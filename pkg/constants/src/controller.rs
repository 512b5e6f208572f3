//! Deployment controller defaults.

/// Number of concurrent reconcile workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Full resync period: every Deployment is re-enqueued this often, in seconds.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30;

/// First retry delay for a failed key, in milliseconds.
pub const REQUEUE_INITIAL_BACKOFF_MS: u64 = 5;

/// Backoff multiplier applied after every consecutive failure.
pub const REQUEUE_BACKOFF_MULTIPLIER: u32 = 2;

/// Upper bound on the retry delay for a failed key, in seconds.
pub const REQUEUE_MAX_BACKOFF_SECS: u64 = 300;

/// Reason attached to every scale event emitted by the controller.
pub const SCALING_REPLICA_SET_REASON: &str = "ScalingReplicaSet";

/// Owner reference kind used for ReplicaSets created by the controller.
pub const DEPLOYMENT_KIND: &str = "Deployment";

/// Length of the template-hash suffix in generated ReplicaSet names.
pub const REPLICASET_HASH_SUFFIX_LEN: usize = 10;
