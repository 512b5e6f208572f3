use chrono::Utc;
use pkg_constants::controller::{DEPLOYMENT_KIND, REPLICASET_HASH_SUFFIX_LEN};
use pkg_state::registry::{StoreError, WorkloadStore};
use pkg_types::deployment::Deployment;
use pkg_types::pod::PodTemplate;
use pkg_types::replicaset::{OwnerReference, ReplicaSet, ReplicaSetSpec, ReplicaSetStatus};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ReconcileError;

/// Label added to the selector and pod template of every generated ReplicaSet.
pub const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// The owned ReplicaSets of a Deployment split by generation.
#[derive(Debug, Clone, Default)]
pub struct Generations {
    /// The ReplicaSet matching the current template, if one exists.
    pub new: Option<ReplicaSet>,
    /// Every other owned ReplicaSet, most recently created first.
    pub old: Vec<ReplicaSet>,
}

impl Generations {
    /// Old and new together, old first.
    pub fn all(&self) -> Vec<ReplicaSet> {
        let mut all = self.old.clone();
        all.extend(self.new.iter().cloned());
        all
    }
}

/// Hash of the pod template, used as the generation identity.
///
/// FNV-1a over the template's JSON form, rendered as 16 hex characters.
pub fn compute_template_hash(template: &PodTemplate) -> Result<String, ReconcileError> {
    let json = serde_json::to_vec(template)
        .map_err(|e| ReconcileError::Configuration(format!("unserializable template: {}", e)))?;
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in json {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    Ok(format!("{:016x}", hash))
}

/// Name of the ReplicaSet that runs `hash` for `deploy`.
pub fn replicaset_name(deploy: &Deployment, hash: &str) -> String {
    format!(
        "{}-{}",
        deploy.name,
        &hash[..REPLICASET_HASH_SUFFIX_LEN.min(hash.len())]
    )
}

/// Split `owned` into the new ReplicaSet and the old ones.
///
/// If several ReplicaSets carry the current hash the oldest is new and the
/// rest are old, so every owned ReplicaSet lands in exactly one bucket.
pub fn classify(owned: Vec<ReplicaSet>, template_hash: &str) -> Generations {
    let mut owned = owned;
    owned.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));

    let mut new = None;
    let mut old = Vec::with_capacity(owned.len());
    for rs in owned {
        if new.is_none() && rs.template_hash == template_hash {
            new = Some(rs);
        } else {
            old.push(rs);
        }
    }
    old.reverse();
    Generations { new, old }
}

/// Finds, and on request creates, the ReplicaSets of a Deployment.
pub struct GenerationResolver {
    store: Arc<dyn WorkloadStore>,
}

impl GenerationResolver {
    pub fn new(store: Arc<dyn WorkloadStore>) -> Self {
        Self { store }
    }

    /// Current generations of `deploy`. With `create` set, a new ReplicaSet
    /// at zero replicas is created when none matches the current template.
    pub async fn resolve(
        &self,
        deploy: &Deployment,
        create: bool,
    ) -> Result<Generations, ReconcileError> {
        if create {
            let (new, old) = self.resolve_with_new(deploy).await?;
            return Ok(Generations {
                new: Some(new),
                old,
            });
        }
        let hash = compute_template_hash(&deploy.spec.template)?;
        let owned = self
            .store
            .list_replicasets(&deploy.namespace, &deploy.id)
            .await?;
        Ok(classify(owned, &hash))
    }

    /// The new ReplicaSet, created if missing, and the old ones.
    pub async fn resolve_with_new(
        &self,
        deploy: &Deployment,
    ) -> Result<(ReplicaSet, Vec<ReplicaSet>), ReconcileError> {
        let hash = compute_template_hash(&deploy.spec.template)?;
        let owned = self
            .store
            .list_replicasets(&deploy.namespace, &deploy.id)
            .await?;
        let generations = classify(owned, &hash);
        let new = match generations.new {
            Some(rs) => rs,
            None => self.create_new_replicaset(deploy, &hash).await?,
        };
        Ok((new, generations.old))
    }

    async fn create_new_replicaset(
        &self,
        deploy: &Deployment,
        hash: &str,
    ) -> Result<ReplicaSet, ReconcileError> {
        let name = replicaset_name(deploy, hash);

        let mut template = deploy.spec.template.clone();
        template
            .labels
            .insert(POD_TEMPLATE_HASH_LABEL.to_string(), hash.to_string());
        let mut selector = deploy.spec.selector.clone();
        selector.insert(POD_TEMPLATE_HASH_LABEL.to_string(), hash.to_string());

        let rs = ReplicaSet {
            id: Uuid::new_v4().to_string(),
            name: name.clone(),
            namespace: deploy.namespace.clone(),
            spec: ReplicaSetSpec {
                replicas: 0,
                selector,
                template,
            },
            status: ReplicaSetStatus::default(),
            owner_references: vec![OwnerReference {
                kind: DEPLOYMENT_KIND.to_string(),
                name: deploy.name.clone(),
                uid: deploy.id.clone(),
                controller: true,
            }],
            template_hash: hash.to_string(),
            resource_version: 0,
            created_at: Utc::now(),
        };

        match self.store.create_replicaset(rs).await {
            Ok(created) => {
                info!(
                    "Deployment {}: created new RS {} (hash={})",
                    deploy.name, created.name, hash
                );
                Ok(created)
            }
            Err(StoreError::AlreadyExists { kind, key }) => {
                // A previous pass created it but the list above raced with it
                let existing = self.store.get_replicaset(&deploy.namespace, &name).await?;
                if existing.is_controlled_by(&deploy.id) && existing.template_hash == hash {
                    debug!(
                        "Deployment {}: adopting existing RS {}",
                        deploy.name, existing.name
                    );
                    Ok(existing)
                } else {
                    Err(StoreError::AlreadyExists { kind, key }.into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}
