//! StorageDeployment CRD
//!
//! Declares the storage infrastructure resources a storage cluster needs
//! and whether its nodes are supervised for drain requests.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// StorageDeployment CRD
// =============================================================================

/// StorageDeployment is the declared state the operator converges the
/// cluster toward on every pass.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "lifecycle.billyronks.io",
    version = "v1",
    kind = "StorageDeployment",
    plural = "storagedeployments",
    shortname = "sdep",
    status = "StorageDeploymentStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Classes", "type": "integer", "jsonPath": ".status.storageClassCount"}"#,
    printcolumn = r#"{"name": "Drain-Ready", "type": "string", "jsonPath": ".status.drainReadyNodes"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct StorageDeploymentSpec {
    /// Storage classes the cluster exposes
    #[serde(default)]
    pub storage_classes: Vec<StorageClassTemplate>,

    /// Ingress policy protecting the storage daemons
    #[serde(default)]
    pub network_policy: Option<NetworkPolicyTemplate>,

    /// Cross-cluster mirroring settings
    #[serde(default)]
    pub mirroring: Option<MirroringSpec>,

    /// Node drain supervision
    #[serde(default)]
    pub node_drain: NodeDrainSpec,
}

// =============================================================================
// Sub-Types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassTemplate {
    pub name: String,

    /// CSI driver name
    pub provisioner: String,

    /// Driver parameters (pool, clusterID, fstype, ...)
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Delete or Retain
    #[serde(default)]
    pub reclaim_policy: Option<String>,

    /// Immediate or WaitForFirstConsumer
    #[serde(default)]
    pub volume_binding_mode: Option<String>,

    #[serde(default)]
    pub allow_volume_expansion: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicyTemplate {
    /// Labels selecting the protected pods
    #[serde(default)]
    pub pod_selector: BTreeMap<String, String>,

    /// TCP ports admitted from anywhere
    #[serde(default)]
    pub ingress_ports: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MirroringSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Peer cluster site names
    #[serde(default)]
    pub peers: Vec<String>,

    /// Snapshot schedule interval (e.g. "1h")
    #[serde(default = "default_schedule_interval")]
    pub schedule_interval: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeDrainSpec {
    /// Run the drain workflow on every pass
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for NodeDrainSpec {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// =============================================================================
// Status
// =============================================================================

/// Status of the StorageDeployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageDeploymentStatus {
    #[serde(default)]
    pub phase: DeploymentPhase,

    /// End of the last pass
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub last_reconciled: Option<DateTime<Utc>>,

    /// Error text of the last pass, empty when it succeeded
    #[serde(default)]
    pub message: Option<String>,

    /// Whether the last pass wrote anything
    #[serde(default)]
    pub changed: bool,

    #[serde(default)]
    pub storage_class_count: u32,

    /// Nodes reported ready for maintenance
    #[serde(default)]
    pub drain_ready_nodes: Vec<String>,
}

/// Deployment lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum DeploymentPhase {
    #[default]
    Pending,
    Ready,
    Degraded,
}

impl std::fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentPhase::Pending => write!(f, "Pending"),
            DeploymentPhase::Ready => write!(f, "Ready"),
            DeploymentPhase::Degraded => write!(f, "Degraded"),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_schedule_interval() -> String {
    "1h".to_string()
}
