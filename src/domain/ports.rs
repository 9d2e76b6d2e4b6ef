//! Domain Ports - Core trait definitions for the lifecycle operator
//!
//! These traits define the boundaries between the reconcile engine and the
//! control-plane API. The `adapters` module implements them against
//! Kubernetes; tests implement them in memory.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Resource Identity
// =============================================================================

/// Identity of a managed object. Cluster-scoped objects have no namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

// =============================================================================
// Structural Diff
// =============================================================================

/// A single owned field whose desired value differs from the observed one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// Dotted path of the field, e.g. `spec.parameters`
    pub field: String,
    /// Whether the platform accepts updates to this field after creation
    pub mutable: bool,
}

/// Owned-field differences between a desired and an observed object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDiff {
    pub changes: Vec<FieldChange>,
}

impl ResourceDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a change to `field` when `differs` holds.
    pub fn check(&mut self, field: &str, mutable: bool, differs: bool) -> &mut Self {
        if differs {
            self.changes.push(FieldChange {
                field: field.to_string(),
                mutable,
            });
        }
        self
    }

    pub fn extend(&mut self, other: ResourceDiff) {
        self.changes.extend(other.changes);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn has_mutable(&self) -> bool {
        self.changes.iter().any(|c| c.mutable)
    }

    pub fn immutable_fields(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| !c.mutable)
            .map(|c| c.field.as_str())
            .collect()
    }
}

/// Compare an optional owned field. Unset desired values are not owned.
pub fn option_differs<T: PartialEq>(desired: &Option<T>, observed: &Option<T>) -> bool {
    desired.is_some() && desired != observed
}

/// True when any desired entry is missing from, or different in, `observed`.
pub fn map_subset_differs<V: PartialEq>(
    desired: &BTreeMap<String, V>,
    observed: &BTreeMap<String, V>,
) -> bool {
    desired.iter().any(|(k, v)| observed.get(k) != Some(v))
}

// =============================================================================
// Managed Resource Port
// =============================================================================

/// Capability interface the generic reconciler drives for one resource kind
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    type Object: Clone + Send + Sync;

    /// Kind name used in logs and errors
    fn kind(&self) -> &str;

    /// Identity of an object of this kind
    fn key(&self, object: &Self::Object) -> ResourceKey;

    /// Fetch the observed object; `Ok(None)` when it does not exist
    async fn get(&self, key: &ResourceKey) -> Result<Option<Self::Object>>;

    /// Create the desired object
    async fn create(&self, desired: &Self::Object) -> Result<()>;

    /// Write back an observed object with owned fields merged in
    async fn update(&self, object: &Self::Object) -> Result<()>;

    /// Delete an object; `Ok(false)` when it was already gone
    async fn delete(&self, key: &ResourceKey) -> Result<bool>;

    /// Keys of every live object carrying this system's ownership marker
    async fn list_owned(&self) -> Result<Vec<ResourceKey>>;

    /// Differences over the fields this system owns
    fn diff(&self, desired: &Self::Object, observed: &Self::Object) -> ResourceDiff;

    /// Copy the mutable owned fields of `desired` onto `observed`
    fn merge(&self, desired: &Self::Object, observed: Self::Object) -> Self::Object;
}

// =============================================================================
// Usage Port
// =============================================================================

/// An object that may hold a reference to a managed resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumer {
    pub kind: String,
    pub name: String,
    /// Lifecycle phase, e.g. `Bound`, `Released`, `Failed`
    pub phase: Option<String>,
    /// Name of the managed resource referenced, if any
    pub reference: Option<String>,
}

impl Consumer {
    pub fn is_bound(&self) -> bool {
        self.phase.as_deref() == Some("Bound")
    }
}

/// Port for scanning consumers of managed resources
#[async_trait]
pub trait UsageSource: Send + Sync {
    async fn consumers(&self) -> Result<Vec<Consumer>>;
}

// =============================================================================
// Drain Ports
// =============================================================================

/// Node metadata relevant to the drain workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Reference to a pod
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl std::fmt::Display for PodRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The fields of a volume attachment the drain workflow matches on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttachmentInfo {
    pub name: String,
    pub attacher: String,
    pub node_name: String,
}

/// Port for the node, pod and volume-attachment calls of the drain workflow
#[async_trait]
pub trait DrainClient: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>>;

    /// Set a node label; `None` removes it
    async fn set_node_label(&self, node: &str, key: &str, value: Option<&str>) -> Result<()>;

    /// Set a node annotation; `None` removes it
    async fn set_node_annotation(&self, node: &str, key: &str, value: Option<&str>)
        -> Result<()>;

    /// Storage-plugin pods scheduled on `node`
    async fn plugin_pods_on_node(&self, node: &str) -> Result<Vec<PodRef>>;

    /// Delete a pod; `Ok(false)` when it was already gone
    async fn delete_pod(&self, pod: &PodRef) -> Result<bool>;

    async fn list_volume_attachments(&self) -> Result<Vec<VolumeAttachmentInfo>>;

    /// Delete a volume attachment; `Ok(false)` when it was already gone
    async fn delete_volume_attachment(&self, name: &str) -> Result<bool>;
}

/// Captured output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Port for running commands inside a container
#[async_trait]
pub trait PodExecutor: Send + Sync {
    async fn exec(&self, pod: &PodRef, container: &str, command: &[String]) -> Result<ExecOutput>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type UsageSourceRef = Arc<dyn UsageSource>;
pub type DrainClientRef = Arc<dyn DrainClient>;
pub type PodExecutorRef = Arc<dyn PodExecutor>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_key_display() {
        assert_eq!(ResourceKey::cluster("fast").to_string(), "fast");
        assert_eq!(
            ResourceKey::namespaced("storage", "peer-secret").to_string(),
            "storage/peer-secret"
        );
    }

    #[test]
    fn test_diff_mutability() {
        let mut diff = ResourceDiff::new();
        diff.check("spec.parameters", false, true)
            .check("allowVolumeExpansion", true, false);
        assert!(!diff.is_empty());
        assert!(!diff.has_mutable());
        assert_eq!(diff.immutable_fields(), vec!["spec.parameters"]);
    }

    #[test]
    fn test_option_and_map_helpers() {
        assert!(!option_differs::<String>(&None, &Some("Delete".into())));
        assert!(option_differs(&Some(1), &None));

        let mut desired = BTreeMap::new();
        desired.insert("a".to_string(), "1".to_string());
        let mut observed = desired.clone();
        observed.insert("b".to_string(), "2".to_string());
        assert!(!map_subset_differs(&desired, &observed));
        observed.insert("a".to_string(), "3".to_string());
        assert!(map_subset_differs(&desired, &observed));
    }

    #[test]
    fn test_consumer_bound() {
        let claim = Consumer {
            kind: "PersistentVolumeClaim".into(),
            name: "data".into(),
            phase: Some("Bound".into()),
            reference: Some("fast".into()),
        };
        assert!(claim.is_bound());
    }
}
