//! Deployment rollout controllers.
//!
//! [`deployment::DeploymentController`] dispatches Deployment keys to the
//! [`recreate::RecreateReconciler`], which drives old ReplicaSets to zero
//! before scaling the new one up.

pub mod cleanup;
pub mod deployment;
pub mod error;
pub mod events;
pub mod generation;
pub mod recreate;
pub mod scale;
pub mod status;
pub mod workqueue;

#[cfg(test)]
mod testutil;
