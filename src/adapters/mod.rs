//! Kubernetes Adapters
//!
//! `kube`-backed implementations of the domain ports.

pub mod drain;
pub mod fields;
pub mod resource;
pub mod usage;

pub use drain::{DrainScope, KubeDrainClient, KubePodExecutor};
pub use fields::ManagedFields;
pub use resource::{KubeResourceAdapter, OwnerLabel, OWNER_LABEL_KEY};
pub use usage::{ClaimUsage, NoConsumers};
