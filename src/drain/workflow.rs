//! Node Drain Workflow
//!
//! Evicts storage-plugin workload from nodes that an external controller
//! asked to drain, then reports the node as ready for maintenance. Each
//! step is a bounded poll; a failing step stops work on that node only and
//! leaves its labels and annotations as far as progress got.

use crate::domain::ports::{DrainClientRef, NodeInfo, PodExecutorRef, PodRef};
use crate::drain::mounts::{raw_block_targets, RAW_BLOCK_MARKER};
use crate::drain::state::{
    plan, transition, DrainKeys, DrainPhase, EvictionStep, NodeAction, NodeDrainState,
    StepOutcome, Transition,
};
use crate::error::{Error, Result};
use crate::reconcile::poll::{poll, with_cancel, PollSpec};
use crate::reconcile::reconciler::ChangeResult;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the drain workflow
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Label and annotation keys
    pub keys: DrainKeys,
    /// Container of the plugin pod that sees the node's mounts
    pub plugin_container: String,
    /// CSI attacher name volume attachments are matched on
    pub attacher: String,
    /// Command printing the mount table inside the plugin container
    pub mount_table_command: Vec<String>,
    /// Path fragment identifying raw-block mounts
    pub raw_block_marker: String,
    /// Unmount and volume-attachment cleanup
    pub detach: PollSpec,
    /// Plugin pod deletion
    pub pod_eviction: PollSpec,
    /// Plugin pod staying away from the node
    pub consistency: PollSpec,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            keys: DrainKeys::default(),
            plugin_container: "csi-rbdplugin".to_string(),
            attacher: "rbd.csi.ceph.com".to_string(),
            mount_table_command: vec!["cat".to_string(), "/proc/mounts".to_string()],
            raw_block_marker: RAW_BLOCK_MARKER.to_string(),
            detach: PollSpec {
                interval: Duration::from_secs(10),
                timeout: Duration::from_secs(300),
            },
            pod_eviction: PollSpec {
                interval: Duration::from_secs(5),
                timeout: Duration::from_secs(120),
            },
            consistency: PollSpec {
                interval: Duration::from_secs(5),
                timeout: Duration::from_secs(120),
            },
        }
    }
}

// =============================================================================
// Pass Summary
// =============================================================================

/// What happened to one node this pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeResult {
    Unchanged,
    WatchLabelAdded,
    DrainReady,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    /// Phase observed at the start of the pass
    pub phase: DrainPhase,
    pub result: NodeResult,
}

/// Per-node outcomes of one workflow pass
#[derive(Debug, Default)]
pub struct DrainSummary {
    pub nodes: BTreeMap<String, NodeReport>,
    pub errors: Vec<Error>,
}

impl DrainSummary {
    pub fn changed(&self) -> bool {
        self.nodes.values().any(|r| {
            matches!(r.result, NodeResult::WatchLabelAdded)
                || (r.result == NodeResult::DrainReady && r.phase != DrainPhase::DrainReady)
        })
    }

    /// Nodes that are ready for maintenance after this pass
    pub fn ready_nodes(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|(_, r)| r.result == NodeResult::DrainReady || r.phase == DrainPhase::DrainReady)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn into_parts(self) -> (BTreeMap<String, NodeReport>, ChangeResult) {
        let changed = self.changed();
        let result = ChangeResult {
            changed,
            error: Error::collapse(self.errors),
        };
        (self.nodes, result)
    }
}

// =============================================================================
// Workflow
// =============================================================================

/// Per-node drain state machine driven over every node of the cluster
pub struct DrainWorkflow {
    config: DrainConfig,
    client: DrainClientRef,
    executor: PodExecutorRef,
}

impl DrainWorkflow {
    pub fn new(config: DrainConfig, client: DrainClientRef, executor: PodExecutorRef) -> Self {
        Self {
            config,
            client,
            executor,
        }
    }

    pub fn config(&self) -> &DrainConfig {
        &self.config
    }

    /// Evaluate every node once. One node's failure never stops the others.
    pub async fn run(&self, cancel: &CancellationToken) -> DrainSummary {
        let mut summary = DrainSummary::default();

        let mut nodes = match with_cancel(cancel, "node list", self.client.list_nodes()).await {
            Ok(nodes) => nodes,
            Err(e) => {
                summary.errors.push(e.for_resource("list", "Node", "all"));
                return summary;
            }
        };
        nodes.sort_by(|a, b| a.name.cmp(&b.name));

        for node in &nodes {
            let state =
                NodeDrainState::from_metadata(&self.config.keys, &node.labels, &node.annotations);
            let phase = state.phase();

            let result = match self.process_node(cancel, node, state).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(node = %node.name, phase = %phase, error = %e, "Node drain pass failed");
                    let result = NodeResult::Failed(e.to_string());
                    let stop = e.is_cancelled();
                    summary.errors.push(e);
                    summary
                        .nodes
                        .insert(node.name.clone(), NodeReport { phase, result });
                    if stop {
                        break;
                    }
                    continue;
                }
            };

            summary
                .nodes
                .insert(node.name.clone(), NodeReport { phase, result });
        }

        info!(
            nodes = summary.nodes.len(),
            ready = summary.ready_nodes().len(),
            failed = summary.errors.len(),
            "Drain workflow pass finished"
        );
        summary
    }

    async fn process_node(
        &self,
        cancel: &CancellationToken,
        node: &NodeInfo,
        state: NodeDrainState,
    ) -> Result<NodeResult> {
        match plan(state.phase()) {
            NodeAction::None => Ok(NodeResult::Unchanged),
            NodeAction::AddWatchLabel => {
                let target = format!("watch label on node {}", node.name);
                with_cancel(
                    cancel,
                    &target,
                    self.client
                        .set_node_label(&node.name, &self.config.keys.watch_label, Some("true")),
                )
                .await
                .map_err(|e| e.for_node(&node.name, "watch labelling"))?;
                info!(node = %node.name, "Added watch label");
                Ok(NodeResult::WatchLabelAdded)
            }
            NodeAction::Evict => {
                self.evict(cancel, &node.name, state).await?;
                Ok(NodeResult::DrainReady)
            }
        }
    }

    /// Run the eviction steps in order, stopping at the first failure.
    async fn evict(
        &self,
        cancel: &CancellationToken,
        node: &str,
        state: NodeDrainState,
    ) -> Result<()> {
        info!(node = %node, "Drain requested, evicting storage plugin workload");
        let mut step = EvictionStep::FIRST;

        loop {
            debug!(node = %node, step = %step, "Running drain step");
            let result = self.run_step(cancel, step, node, state).await;
            let outcome = if result.is_ok() {
                StepOutcome::Succeeded
            } else {
                StepOutcome::Failed
            };

            match transition(step, outcome) {
                Transition::Advance(next) => step = next,
                Transition::Complete => {
                    info!(node = %node, "Node is ready for maintenance");
                    return Ok(());
                }
                Transition::Abort(at) => return result.map_err(|e| e.for_node(node, at)),
            }
        }
    }

    async fn run_step(
        &self,
        cancel: &CancellationToken,
        step: EvictionStep,
        node: &str,
        state: NodeDrainState,
    ) -> Result<()> {
        match step {
            EvictionStep::VolumesDetaching => {
                let target = format!("volume detach on node {}", node);
                poll(cancel, self.config.detach, &target, || self.detach_volumes(node)).await
            }
            EvictionStep::PodEvictionVerified => {
                let target = format!("plugin pod deletion on node {}", node);
                poll(cancel, self.config.pod_eviction, &target, || {
                    self.delete_plugin_pods(node)
                })
                .await
            }
            EvictionStep::DaemonsetConsistent => {
                let target = format!("plugin pod absence on node {}", node);
                poll(cancel, self.config.consistency, &target, || {
                    self.plugin_pods_absent(node)
                })
                .await
            }
            EvictionStep::DrainReady => self.mark_ready(cancel, node, state).await,
        }
    }

    /// One detach attempt: unmount raw-block volumes, drop attachments.
    ///
    /// Every plugin pod on the node is inspected, since during a rollout the
    /// old and new pod may see different mounts. Done once the node has no
    /// plugin pod, or no pod shows a raw-block mount and no matching
    /// attachment is left.
    async fn detach_volumes(&self, node: &str) -> Result<bool> {
        let pods = self.client.plugin_pods_on_node(node).await?;
        if pods.is_empty() {
            debug!(node = %node, "No storage plugin pod on node, nothing to detach");
            return Ok(true);
        }
        if pods.len() > 1 {
            debug!(node = %node, pods = pods.len(), "Several storage plugin pods on node");
        }

        let container = self.config.plugin_container.as_str();
        let mut mounted = false;
        for pod in &pods {
            let table = self
                .executor
                .exec(pod, container, &self.config.mount_table_command)
                .await?;
            let targets = raw_block_targets(&table.stdout, &self.config.raw_block_marker);

            for target in &targets {
                info!(node = %node, pod = %pod, target = %target, "Unmounting raw block volume");
                self.unmount(pod, container, target).await?;
            }
            mounted |= !targets.is_empty();
        }

        let attachments: Vec<_> = self
            .client
            .list_volume_attachments()
            .await?
            .into_iter()
            .filter(|va| va.attacher == self.config.attacher && va.node_name == node)
            .collect();

        for attachment in &attachments {
            if self.client.delete_volume_attachment(&attachment.name).await? {
                info!(node = %node, attachment = %attachment.name, "Deleted volume attachment");
            }
        }

        Ok(!mounted && attachments.is_empty())
    }

    async fn unmount(&self, pod: &PodRef, container: &str, target: &str) -> Result<()> {
        let command = vec!["umount".to_string(), target.to_string()];
        self.executor.exec(pod, container, &command).await?;
        Ok(())
    }

    /// One eviction attempt; done when no plugin pod is left to delete.
    async fn delete_plugin_pods(&self, node: &str) -> Result<bool> {
        let pods = self.client.plugin_pods_on_node(node).await?;
        let mut pending = false;
        for pod in &pods {
            if self.client.delete_pod(pod).await? {
                info!(node = %node, pod = %pod, "Deleted storage plugin pod");
                pending = true;
            }
        }
        Ok(!pending)
    }

    async fn plugin_pods_absent(&self, node: &str) -> Result<bool> {
        Ok(self.client.plugin_pods_on_node(node).await?.is_empty())
    }

    async fn mark_ready(
        &self,
        cancel: &CancellationToken,
        node: &str,
        state: NodeDrainState,
    ) -> Result<()> {
        let keys = &self.config.keys;
        let target = format!("drain-ready marking on node {}", node);

        if state.watch_label_present {
            with_cancel(
                cancel,
                &target,
                self.client.set_node_label(node, &keys.watch_label, None),
            )
            .await?;
            debug!(node = %node, "Removed watch label");
        }

        if !state.drain_ready {
            with_cancel(
                cancel,
                &target,
                self.client
                    .set_node_annotation(node, &keys.drain_ready_annotation, Some("true")),
            )
            .await?;
        }
        Ok(())
    }
}
