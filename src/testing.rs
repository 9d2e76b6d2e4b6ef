//! In-memory implementations of the domain ports for unit tests.

use crate::domain::ports::*;
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

pub const TEST_OWNER_LABEL: &str = "test/managed-by";

// =============================================================================
// Resource Adapter Fake
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestObject {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub spec: String,
    /// Stands in for a field the platform refuses to update
    pub immutable: String,
}

impl TestObject {
    pub fn new(name: &str, spec: &str) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
            spec: spec.into(),
            immutable: String::new(),
        }
    }

    pub fn owned(mut self) -> Self {
        self.labels.insert(TEST_OWNER_LABEL.into(), "test".into());
        self
    }
}

#[derive(Default)]
struct AdapterState {
    objects: BTreeMap<String, TestObject>,
    created: Vec<String>,
    updates: usize,
    deletes: usize,
    fail_get: BTreeMap<String, String>,
    fail_create: BTreeMap<String, String>,
    fail_update: BTreeMap<String, String>,
    fail_delete: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct FakeAdapter {
    state: Mutex<AdapterState>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, object: TestObject) {
        self.state.lock().objects.insert(object.name.clone(), object);
    }

    pub fn remove_silently(&self, name: &str) {
        self.state.lock().objects.remove(name);
    }

    pub fn stored(&self, name: &str) -> Option<TestObject> {
        self.state.lock().objects.get(name).cloned()
    }

    pub fn fail_get(&self, name: &str, msg: &str) {
        self.state.lock().fail_get.insert(name.into(), msg.into());
    }

    pub fn fail_create(&self, name: &str, msg: &str) {
        self.state.lock().fail_create.insert(name.into(), msg.into());
    }

    pub fn fail_update(&self, name: &str, msg: &str) {
        self.state.lock().fail_update.insert(name.into(), msg.into());
    }

    pub fn fail_delete(&self, name: &str, msg: &str) {
        self.state.lock().fail_delete.insert(name.into(), msg.into());
    }

    pub fn creates(&self) -> usize {
        self.state.lock().created.len()
    }

    pub fn updates(&self) -> usize {
        self.state.lock().updates
    }

    pub fn writes(&self) -> usize {
        let state = self.state.lock();
        state.created.len() + state.updates + state.deletes
    }

    pub fn created_order(&self) -> Vec<String> {
        self.state.lock().created.clone()
    }
}

fn injected(map: &BTreeMap<String, String>, name: &str) -> Result<()> {
    match map.get(name) {
        Some(msg) => Err(Error::Internal(msg.clone())),
        None => Ok(()),
    }
}

#[async_trait]
impl ResourceAdapter for FakeAdapter {
    type Object = TestObject;

    fn kind(&self) -> &str {
        "TestObject"
    }

    fn key(&self, object: &TestObject) -> ResourceKey {
        ResourceKey::cluster(object.name.clone())
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<TestObject>> {
        let state = self.state.lock();
        injected(&state.fail_get, &key.name)?;
        Ok(state.objects.get(&key.name).cloned())
    }

    async fn create(&self, desired: &TestObject) -> Result<()> {
        let mut state = self.state.lock();
        injected(&state.fail_create, &desired.name)?;
        state.objects.insert(desired.name.clone(), desired.clone().owned());
        state.created.push(desired.name.clone());
        Ok(())
    }

    async fn update(&self, object: &TestObject) -> Result<()> {
        let mut state = self.state.lock();
        injected(&state.fail_update, &object.name)?;
        state.objects.insert(object.name.clone(), object.clone());
        state.updates += 1;
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<bool> {
        let mut state = self.state.lock();
        injected(&state.fail_delete, &key.name)?;
        let existed = state.objects.remove(&key.name).is_some();
        if existed {
            state.deletes += 1;
        }
        Ok(existed)
    }

    async fn list_owned(&self) -> Result<Vec<ResourceKey>> {
        let state = self.state.lock();
        Ok(state
            .objects
            .values()
            .filter(|o| o.labels.contains_key(TEST_OWNER_LABEL))
            .map(|o| ResourceKey::cluster(o.name.clone()))
            .collect())
    }

    fn diff(&self, desired: &TestObject, observed: &TestObject) -> ResourceDiff {
        let mut diff = ResourceDiff::new();
        diff.check("metadata.labels", true, map_subset_differs(&desired.labels, &observed.labels))
            .check("spec", true, desired.spec != observed.spec)
            .check("immutable", false, desired.immutable != observed.immutable);
        diff
    }

    fn merge(&self, desired: &TestObject, mut observed: TestObject) -> TestObject {
        observed
            .labels
            .extend(desired.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        observed.spec = desired.spec.clone();
        observed
    }
}

// =============================================================================
// Usage Source Fake
// =============================================================================

pub struct FakeUsage {
    consumers: Mutex<Vec<Consumer>>,
    scans: Mutex<usize>,
}

impl FakeUsage {
    pub fn new(consumers: Vec<Consumer>) -> Self {
        Self {
            consumers: Mutex::new(consumers),
            scans: Mutex::new(0),
        }
    }

    pub fn set(&self, consumers: Vec<Consumer>) {
        *self.consumers.lock() = consumers;
    }

    pub fn scans(&self) -> usize {
        *self.scans.lock()
    }
}

#[async_trait]
impl UsageSource for FakeUsage {
    async fn consumers(&self) -> Result<Vec<Consumer>> {
        *self.scans.lock() += 1;
        Ok(self.consumers.lock().clone())
    }
}

// =============================================================================
// Drain Fakes
// =============================================================================

#[derive(Default)]
struct ClusterState {
    nodes: BTreeMap<String, NodeInfo>,
    pods: Vec<(String, PodRef)>,
    attachments: Vec<VolumeAttachmentInfo>,
    deleted_attachments: Vec<String>,
    pod_deletes: usize,
    pod_delete_not_found: bool,
    pods_stuck: bool,
    fail_label_nodes: Vec<String>,
    fail_list_nodes: bool,
}

/// In-memory cluster holding nodes, plugin pods and volume attachments
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, name: &str, labels: &[(&str, &str)], annotations: &[(&str, &str)]) {
        let node = NodeInfo {
            name: name.into(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        self.state.lock().nodes.insert(name.into(), node);
    }

    pub fn add_plugin_pod(&self, node: &str, pod: &str) {
        self.state.lock().pods.push((
            node.into(),
            PodRef {
                namespace: "storage-system".into(),
                name: pod.into(),
            },
        ));
    }

    pub fn add_attachment(&self, name: &str, attacher: &str, node: &str) {
        self.state.lock().attachments.push(VolumeAttachmentInfo {
            name: name.into(),
            attacher: attacher.into(),
            node_name: node.into(),
        });
    }

    /// Pod deletes report NotFound while still removing the pod
    pub fn pod_delete_returns_not_found(&self) {
        self.state.lock().pod_delete_not_found = true;
    }

    /// Pod deletes are accepted but the pods never go away
    pub fn stick_pods(&self) {
        self.state.lock().pods_stuck = true;
    }

    pub fn fail_labels_on(&self, node: &str) {
        self.state.lock().fail_label_nodes.push(node.into());
    }

    pub fn fail_list_nodes(&self) {
        self.state.lock().fail_list_nodes = true;
    }

    pub fn node(&self, name: &str) -> NodeInfo {
        self.state.lock().nodes.get(name).cloned().unwrap_or_default()
    }

    pub fn attachment_names(&self) -> Vec<String> {
        self.state
            .lock()
            .attachments
            .iter()
            .map(|a| a.name.clone())
            .collect()
    }

    pub fn deleted_attachments(&self) -> Vec<String> {
        self.state.lock().deleted_attachments.clone()
    }

    pub fn pod_deletes(&self) -> usize {
        self.state.lock().pod_deletes
    }
}

#[async_trait]
impl DrainClient for FakeCluster {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let state = self.state.lock();
        if state.fail_list_nodes {
            return Err(Error::Internal("nodes unavailable".into()));
        }
        Ok(state.nodes.values().cloned().collect())
    }

    async fn set_node_label(&self, node: &str, key: &str, value: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_label_nodes.iter().any(|n| n == node) {
            return Err(Error::Internal(format!("cannot patch node {}", node)));
        }
        let entry = state.nodes.get_mut(node).ok_or_else(|| Error::ResourceNotFound {
            kind: "Node".into(),
            name: node.into(),
        })?;
        match value {
            Some(v) => entry.labels.insert(key.into(), v.into()),
            None => entry.labels.remove(key),
        };
        Ok(())
    }

    async fn set_node_annotation(
        &self,
        node: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.nodes.get_mut(node).ok_or_else(|| Error::ResourceNotFound {
            kind: "Node".into(),
            name: node.into(),
        })?;
        match value {
            Some(v) => entry.annotations.insert(key.into(), v.into()),
            None => entry.annotations.remove(key),
        };
        Ok(())
    }

    async fn plugin_pods_on_node(&self, node: &str) -> Result<Vec<PodRef>> {
        Ok(self
            .state
            .lock()
            .pods
            .iter()
            .filter(|(n, _)| n == node)
            .map(|(_, p)| p.clone())
            .collect())
    }

    async fn delete_pod(&self, pod: &PodRef) -> Result<bool> {
        let mut state = self.state.lock();
        state.pod_deletes += 1;
        if state.pods_stuck {
            return Ok(state.pods.iter().any(|(_, p)| p == pod));
        }
        let before = state.pods.len();
        state.pods.retain(|(_, p)| p != pod);
        let existed = state.pods.len() != before;
        Ok(existed && !state.pod_delete_not_found)
    }

    async fn list_volume_attachments(&self) -> Result<Vec<VolumeAttachmentInfo>> {
        Ok(self.state.lock().attachments.clone())
    }

    async fn delete_volume_attachment(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let before = state.attachments.len();
        state.attachments.retain(|a| a.name != name);
        let existed = state.attachments.len() != before;
        if existed {
            state.deleted_attachments.push(name.into());
        }
        Ok(existed)
    }
}

/// Executor answering mount-table reads from a queue and recording unmounts
#[derive(Default)]
pub struct FakeExecutor {
    mount_tables: Mutex<VecDeque<String>>,
    commands: Mutex<Vec<Vec<String>>>,
}

impl FakeExecutor {
    pub fn new(mount_tables: Vec<&str>) -> Self {
        Self {
            mount_tables: Mutex::new(mount_tables.into_iter().map(String::from).collect()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn unmounts(&self) -> Vec<String> {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some("umount"))
            .filter_map(|c| c.last().cloned())
            .collect()
    }

    pub fn mount_reads(&self) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some("cat"))
            .count()
    }
}

#[async_trait]
impl PodExecutor for FakeExecutor {
    async fn exec(&self, _pod: &PodRef, _container: &str, command: &[String]) -> Result<ExecOutput> {
        self.commands.lock().push(command.to_vec());
        let stdout = if command.first().map(String::as_str) == Some("cat") {
            self.mount_tables.lock().pop_front().unwrap_or_default()
        } else {
            String::new()
        };
        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
        })
    }
}
