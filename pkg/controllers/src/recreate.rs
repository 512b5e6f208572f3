//! Recreate rollouts: every old ReplicaSet is scaled to zero before the new
//! one is scaled up.
//!
//! A pass makes at most one kind of change and returns. Scaling old
//! ReplicaSets down and scaling the new one up are never done in the same
//! pass, so the stored state between passes never has an old and the new
//! ReplicaSet both with desired replicas.

use pkg_state::registry::WorkloadStore;
use pkg_types::deployment::Deployment;
use pkg_types::replicaset::ReplicaSet;
use pkg_types::validate::validate_deployment;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cleanup::CleanupPolicy;
use crate::error::ReconcileError;
use crate::events::EventRecorder;
use crate::generation::GenerationResolver;
use crate::scale::ScalingExecutor;
use crate::status::StatusSynchronizer;

/// Where a pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecreateOutcome {
    /// At least one old ReplicaSet was scaled down.
    ScaledDownOld,
    /// The new ReplicaSet was scaled to the desired count.
    ScaledUpNew,
    /// Nothing needed scaling; cleanup ran and status was synced.
    Synced,
}

pub struct RecreateReconciler {
    resolver: GenerationResolver,
    scaler: ScalingExecutor,
    status: StatusSynchronizer,
    cleanup: CleanupPolicy,
    max_scale_downs_per_pass: Option<usize>,
}

impl RecreateReconciler {
    pub fn new(store: Arc<dyn WorkloadStore>, recorder: Arc<dyn EventRecorder>) -> Self {
        Self {
            resolver: GenerationResolver::new(store.clone()),
            scaler: ScalingExecutor::new(store.clone(), recorder),
            status: StatusSynchronizer::new(store.clone()),
            cleanup: CleanupPolicy::new(store),
            max_scale_downs_per_pass: None,
        }
    }

    /// Stop scaling down after `cap` ReplicaSets in one pass. `None` or zero
    /// means unbounded.
    pub fn with_max_scale_downs_per_pass(mut self, cap: Option<usize>) -> Self {
        self.max_scale_downs_per_pass = cap.filter(|c| *c > 0);
        self
    }

    pub fn status(&self) -> &StatusSynchronizer {
        &self.status
    }

    /// Run one pass for `deploy`, which must be freshly read from the store.
    pub async fn reconcile(&self, deploy: &Deployment) -> Result<RecreateOutcome, ReconcileError> {
        validate_deployment(deploy).map_err(|e| ReconcileError::Configuration(e.to_string()))?;

        // Don't create the new ReplicaSet yet: it must not exist at a nonzero
        // count while old ones are still being scaled down.
        let generations = self.resolver.resolve(deploy, false).await?;

        if self.scale_down_old(&generations.old, deploy).await? {
            let all = generations.all();
            self.status
                .update(&all, generations.new.as_ref(), deploy)
                .await?;
            return Ok(RecreateOutcome::ScaledDownOld);
        }

        let (new_rs, old) = match generations.new {
            Some(rs) => (rs, generations.old),
            None => self.resolver.resolve_with_new(deploy).await?,
        };
        let mut all = old.clone();
        all.push(new_rs.clone());

        let (scaled_up, new_rs) = self
            .scaler
            .scale_replica_set_and_record_event(&new_rs, deploy.spec.replicas, deploy)
            .await?;
        if scaled_up {
            if let Some(last) = all.last_mut() {
                *last = new_rs.clone();
            }
            self.status.update(&all, Some(&new_rs), deploy).await?;
            return Ok(RecreateOutcome::ScaledUpNew);
        }

        if let Err(e) = self.cleanup.cleanup(&old, deploy).await {
            warn!("Deployment {}: cleanup failed: {}", deploy.name, e);
        }
        self.status.sync(&all, Some(&new_rs), deploy).await?;
        Ok(RecreateOutcome::Synced)
    }

    /// Scale every active old ReplicaSet to zero. Returns whether any write
    /// happened. Stops at the first error.
    async fn scale_down_old(
        &self,
        old: &[ReplicaSet],
        deploy: &Deployment,
    ) -> Result<bool, ReconcileError> {
        let mut scaled = 0usize;
        for rs in old.iter().filter(|rs| rs.is_active()) {
            if rs.spec.replicas == 0 {
                continue;
            }
            if let Some(cap) = self.max_scale_downs_per_pass
                && scaled >= cap
            {
                debug!(
                    "Deployment {}: scaled down {} RS this pass, deferring the rest",
                    deploy.name, scaled
                );
                break;
            }
            match self.scaler.scale_replica_set_and_record_event(rs, 0, deploy).await {
                Ok((true, _)) => scaled += 1,
                Ok((false, _)) => {}
                Err(e) if e.is_not_found() => {
                    debug!("Deployment {}: old RS {} already removed", deploy.name, rs.name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(scaled > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Call, MemoryRecorder, TestStore, make_deployment, make_rs, seed};
    use pkg_state::registry::{StoreError, replicaset_key};
    use pkg_types::replicaset::ReplicaSetStatus;

    fn reconciler(store: &Arc<TestStore>) -> RecreateReconciler {
        RecreateReconciler::new(store.clone(), MemoryRecorder::new())
    }

    async fn pass(reconciler: &RecreateReconciler, store: &TestStore) -> RecreateOutcome {
        let deploy = store.registry.get_deployment("default", "web").await.unwrap();
        reconciler.reconcile(&deploy).await.unwrap()
    }

    /// Fail if any old ReplicaSet and the new one both have desired replicas.
    async fn assert_no_overlap(store: &TestStore) {
        let deploy = store.registry.get_deployment("default", "web").await.unwrap();
        let hash = crate::generation::compute_template_hash(&deploy.spec.template).unwrap();
        let owned = store.registry.list_replicasets("default", &deploy.id).await.unwrap();
        let generations = crate::generation::classify(owned, &hash);
        let new_up = generations.new.as_ref().is_some_and(|rs| rs.spec.replicas > 0);
        let old_up = generations.old.iter().any(|rs| rs.spec.replicas > 0);
        assert!(!(new_up && old_up), "old and new generations overlap");
    }

    /// Pods of a scaled-down ReplicaSet finish terminating.
    async fn drain(store: &TestStore, name: &str) {
        store
            .registry
            .apply_replicaset_status("default", name, ReplicaSetStatus::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn converges_in_two_progressing_passes() {
        let store = TestStore::new().await;
        let deploy = make_deployment("web", 5, "nginx:2");
        let old = make_rs(&deploy, "web-old", "h-old", 5, 5, 600);
        seed(&store, deploy, vec![old]).await;
        let reconciler = reconciler(&store);

        assert_eq!(pass(&reconciler, &store).await, RecreateOutcome::ScaledDownOld);
        assert_no_overlap(&store).await;
        let first = store.take_mutations();
        assert_eq!(
            first,
            vec![
                Call::Scale("web-old".to_string(), 0),
                Call::Status("web".to_string())
            ]
        );

        assert_eq!(pass(&reconciler, &store).await, RecreateOutcome::ScaledUpNew);
        assert_no_overlap(&store).await;
        let second = store.take_mutations();
        assert!(matches!(&second[0], Call::Create(_)));
        assert!(matches!(&second[1], Call::Scale(_, 5)));
        assert!(!second.iter().any(|c| matches!(c, Call::Scale(n, _) if n == "web-old")));

        assert_eq!(pass(&reconciler, &store).await, RecreateOutcome::Synced);
        let deploy = store.registry.get_deployment("default", "web").await.unwrap();
        let owned = store.registry.list_replicasets("default", &deploy.id).await.unwrap();
        let old = owned.iter().find(|rs| rs.name == "web-old").unwrap();
        let new = owned.iter().find(|rs| rs.name != "web-old").unwrap();
        assert_eq!(old.spec.replicas, 0);
        assert_eq!(new.spec.replicas, 5);
    }

    #[tokio::test]
    async fn steady_state_is_a_fixed_point() {
        let store = TestStore::new().await;
        let deploy = make_deployment("web", 3, "nginx:2");
        let hash = crate::generation::compute_template_hash(&deploy.spec.template).unwrap();
        let old = make_rs(&deploy, "web-old", "h-old", 0, 0, 600);
        let new = make_rs(&deploy, "web-new", &hash, 3, 3, 60);
        seed(&store, deploy, vec![old, new]).await;
        let reconciler = reconciler(&store);

        // First pass only writes the status projection
        assert_eq!(pass(&reconciler, &store).await, RecreateOutcome::Synced);
        assert_eq!(store.take_mutations(), vec![Call::Status("web".to_string())]);
        let status = store.registry.get_deployment("default", "web").await.unwrap().status;
        assert_eq!(status.replicas, 3);
        assert_eq!(status.updated_replicas, 3);

        for _ in 0..3 {
            assert_eq!(pass(&reconciler, &store).await, RecreateOutcome::Synced);
        }
        assert!(store.mutations().is_empty());
        let again = store.registry.get_deployment("default", "web").await.unwrap().status;
        assert_eq!(again, status);
    }

    #[tokio::test]
    async fn steady_state_invokes_cleanup() {
        let store = TestStore::new().await;
        let mut deploy = make_deployment("web", 2, "nginx:3");
        deploy.spec.revision_history_limit = Some(1);
        let hash = crate::generation::compute_template_hash(&deploy.spec.template).unwrap();
        let rss = vec![
            make_rs(&deploy, "web-v1", "h1", 0, 0, 900),
            make_rs(&deploy, "web-v2", "h2", 0, 0, 600),
            make_rs(&deploy, "web-v3", &hash, 2, 2, 60),
        ];
        seed(&store, deploy, rss).await;
        let reconciler = reconciler(&store);

        assert_eq!(pass(&reconciler, &store).await, RecreateOutcome::Synced);
        let mutations = store.take_mutations();
        assert!(mutations.contains(&Call::Delete("web-v1".to_string())));
        assert!(!mutations.iter().any(|c| matches!(c, Call::Scale(..))));
        assert!(store.registry.get_replicaset("default", "web-v2").await.is_ok());
    }

    #[tokio::test]
    async fn zero_desired_reaches_steady_state_after_scale_down() {
        let store = TestStore::new().await;
        let deploy = make_deployment("web", 0, "nginx:2");
        let old = make_rs(&deploy, "web-old", "h-old", 4, 4, 600);
        seed(&store, deploy, vec![old]).await;
        let reconciler = reconciler(&store);

        assert_eq!(pass(&reconciler, &store).await, RecreateOutcome::ScaledDownOld);
        drain(&store, "web-old").await;
        store.take_mutations();

        // New RS is created at zero and needs no scaling
        assert_eq!(pass(&reconciler, &store).await, RecreateOutcome::Synced);
        let mutations = store.take_mutations();
        assert!(matches!(&mutations[0], Call::Create(_)));
        assert!(!mutations.iter().any(|c| matches!(c, Call::Scale(..))));
    }

    #[tokio::test]
    async fn conflict_during_scale_down_aborts_pass() {
        let store = TestStore::new().await;
        let deploy = make_deployment("web", 3, "nginx:2");
        let old = make_rs(&deploy, "web-old", "h-old", 3, 3, 600);
        let deploy = seed(&store, deploy, vec![old]).await;
        let status_before = deploy.status.clone();
        store.conflict_on("web-old");
        let reconciler = reconciler(&store);

        let err = reconciler.reconcile(&deploy).await.unwrap_err();

        assert!(err.is_conflict());
        assert!(store.mutations().is_empty());
        let after = store.registry.get_deployment("default", "web").await.unwrap();
        assert_eq!(after.status, status_before);
        let owned = store.registry.list_replicasets("default", &deploy.id).await.unwrap();
        assert_eq!(owned.len(), 1);
    }

    #[tokio::test]
    async fn scale_down_fails_fast() {
        let store = TestStore::new().await;
        let deploy = make_deployment("web", 3, "nginx:2");
        let rss = vec![
            make_rs(&deploy, "web-a", "h-a", 2, 2, 300),
            make_rs(&deploy, "web-b", "h-b", 2, 2, 200),
        ];
        let deploy = seed(&store, deploy, rss).await;
        // most recent first: web-b is attempted first
        store.conflict_on("web-b");
        let reconciler = reconciler(&store);

        assert!(reconciler.reconcile(&deploy).await.is_err());
        assert!(store.mutations().is_empty());
        let a = store.registry.get_replicaset("default", "web-a").await.unwrap();
        assert_eq!(a.spec.replicas, 2);
    }

    #[tokio::test]
    async fn terminating_pods_do_not_hold_the_barrier() {
        let store = TestStore::new().await;
        let deploy = make_deployment("web", 2, "nginx:2");
        // desired already zero, pods still going away
        let old = make_rs(&deploy, "web-old", "h-old", 0, 2, 600);
        seed(&store, deploy, vec![old]).await;
        let reconciler = reconciler(&store);

        assert_eq!(pass(&reconciler, &store).await, RecreateOutcome::ScaledUpNew);
        assert_no_overlap(&store).await;
    }

    #[tokio::test]
    async fn scale_down_cap_defers_remaining_replicasets() {
        let store = TestStore::new().await;
        let deploy = make_deployment("web", 1, "nginx:2");
        let rss = vec![
            make_rs(&deploy, "web-a", "h-a", 1, 1, 300),
            make_rs(&deploy, "web-b", "h-b", 1, 1, 200),
            make_rs(&deploy, "web-c", "h-c", 1, 1, 100),
        ];
        seed(&store, deploy, rss).await;
        let reconciler = reconciler(&store).with_max_scale_downs_per_pass(Some(2));

        assert_eq!(pass(&reconciler, &store).await, RecreateOutcome::ScaledDownOld);
        let scaled = store
            .take_mutations()
            .into_iter()
            .filter(|c| matches!(c, Call::Scale(..)))
            .count();
        assert_eq!(scaled, 2);

        assert_eq!(pass(&reconciler, &store).await, RecreateOutcome::ScaledDownOld);
        assert_eq!(
            store.take_mutations()[0],
            Call::Scale("web-a".to_string(), 0)
        );
        assert_eq!(pass(&reconciler, &store).await, RecreateOutcome::ScaledUpNew);
    }

    #[tokio::test]
    async fn removed_old_replicaset_is_skipped() {
        let store = TestStore::new().await;
        let deploy = make_deployment("web", 1, "nginx:2");
        let old = make_rs(&deploy, "web-old", "h-old", 2, 2, 600);
        let deploy = seed(&store, deploy, vec![old]).await;
        store.not_found_on("web-old");
        let reconciler = reconciler(&store);

        // The vanished RS needs no scaling, so the pass moves on to scale-up
        let outcome = reconciler.reconcile(&deploy).await.unwrap();
        assert_eq!(outcome, RecreateOutcome::ScaledUpNew);
        assert!(store.registry.get_replicaset("default", "web-old").await.is_err());
        assert_no_overlap(&store).await;
    }

    #[tokio::test]
    async fn undecodable_replicaset_blocks_scale_up() {
        let store = TestStore::new().await;
        let deploy = make_deployment("web", 3, "nginx:2");
        let old = make_rs(&deploy, "web-old", "h-old", 3, 3, 600);
        let deploy = seed(&store, deploy, vec![old]).await;

        // Stored by a newer writer in a shape this version cannot read
        let stored = store.registry.get_replicaset("default", "web-old").await.unwrap();
        let mut raw = serde_json::to_value(&stored).unwrap();
        raw["status"]["replicas"] = serde_json::json!(-1);
        store
            .registry
            .state()
            .put(
                &replicaset_key("default", "web-old"),
                &serde_json::to_vec(&raw).unwrap(),
            )
            .await
            .unwrap();
        let reconciler = reconciler(&store);

        let err = reconciler.reconcile(&deploy).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Store(StoreError::Codec(_))));
        assert!(err.is_retryable());
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn invalid_deployment_is_a_configuration_error() {
        let store = TestStore::new().await;
        let mut deploy = make_deployment("web", 1, "nginx:2");
        deploy.spec.template.spec.containers.clear();
        let deploy = seed(&store, deploy, vec![]).await;
        let reconciler = reconciler(&store);

        let err = reconciler.reconcile(&deploy).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Configuration(_)));
        assert!(!err.is_retryable());
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_the_pass() {
        let store = TestStore::new().await;
        let deploy = seed(&store, make_deployment("web", 1, "nginx:2"), vec![]).await;
        store.set_unavailable(true);
        let reconciler = reconciler(&store);

        let err = reconciler.reconcile(&deploy).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Store(StoreError::Unavailable(_))));
    }
}
