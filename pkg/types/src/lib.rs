pub mod config;
pub mod deployment;
pub mod event;
pub mod pod;
pub mod replicaset;
pub mod validate;
