//! Storage Lifecycle Operator
//!
//! A Kubernetes operator that converges the infrastructure resources of a
//! storage cluster toward a declared `StorageDeployment` and evacuates
//! storage-plugin workload from nodes before maintenance.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                       StorageDeployment Controller                          │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Storage        │  │  Network        │  │      Mirroring              │  │
//! │  │  Classes        │  │  Policies       │  │      Config                 │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                    ┌───────────┴───────────┐     ┌───────────────────────┐  │
//! │                    │ Resource Orchestrator │     │  Node Drain Workflow  │  │
//! │                    │  reconcile + guard    │     │  detach → evict →     │  │
//! │                    └───────────┬───────────┘     │  verify → mark ready  │  │
//! │                                │                 └───────────┬───────────┘  │
//! │                    ┌───────────┴───────────┐                 │              │
//! │                    │  Poller (cancellable) │◄────────────────┘              │
//! │                    └───────────────────────┘                                │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                        Kubernetes Adapters                                  │
//! │  ┌─────────────────────────────┐  ┌─────────────────────────────────────┐   │
//! │  │  Resource / Usage adapters  │  │   Drain client / Pod executor       │   │
//! │  └─────────────────────────────┘  └─────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`reconcile`]: Poller, single-resource reconciler, usage guard, orchestrator
//! - [`drain`]: Node drain state machine and workflow
//! - [`adapters`]: Kubernetes implementations of the domain ports
//! - [`builders`]: Desired objects from a deployment
//! - [`controller`]: Reconcile passes, status store, metrics
//! - [`api`]: Read-only REST status API
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod adapters;
pub mod api;
pub mod builders;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod drain;
pub mod error;
pub mod reconcile;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use api::{ApiServer, ApiServerConfig};

pub use controller::{Context, Metrics, OperatorConfig, StatusStore};

pub use crd::{DeploymentPhase, StorageDeployment, StorageDeploymentSpec, StorageDeploymentStatus};

pub use domain::ports::{
    Consumer, DrainClient, PodExecutor, ResourceAdapter, ResourceDiff, ResourceKey, UsageSource,
};

pub use drain::{DrainConfig, DrainKeys, DrainWorkflow};

pub use error::{Error, ErrorAction, Result};

pub use reconcile::{poll, PollSpec, ResourceOrchestrator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
