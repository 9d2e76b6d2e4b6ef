//! In-memory status store
//!
//! Holds the outcome of the latest pass per deployment and the latest drain
//! summary so the REST API can answer without touching the API server.

use crate::crd::DeploymentPhase;
use crate::drain::NodeReport;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of the most recent pass for one deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub name: String,
    pub namespace: String,
    pub phase: DeploymentPhase,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub changed_categories: Vec<String>,
    pub drain_ready_nodes: Vec<String>,
    pub last_reconciled: DateTime<Utc>,
}

impl DeploymentRecord {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

#[derive(Default)]
pub struct StatusStore {
    deployments: RwLock<BTreeMap<String, DeploymentRecord>>,
    nodes: RwLock<BTreeMap<String, NodeReport>>,
    ready: AtomicBool,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pass(&self, record: DeploymentRecord) {
        self.deployments.write().insert(record.key(), record);
        self.ready.store(true, Ordering::Release);
    }

    pub fn record_nodes(&self, nodes: BTreeMap<String, NodeReport>) {
        *self.nodes.write() = nodes;
    }

    pub fn deployments(&self) -> Vec<DeploymentRecord> {
        self.deployments.read().values().cloned().collect()
    }

    /// Look up by `namespace/name` or by bare name.
    pub fn deployment(&self, name: &str) -> Option<DeploymentRecord> {
        let deployments = self.deployments.read();
        deployments
            .get(name)
            .or_else(|| deployments.values().find(|r| r.name == name))
            .cloned()
    }

    pub fn nodes(&self) -> BTreeMap<String, NodeReport> {
        self.nodes.read().clone()
    }

    /// True once at least one pass has completed
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
