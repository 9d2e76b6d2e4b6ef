//! StorageDeployment Controller
//!
//! Each pass converges the resource categories a deployment declares, runs
//! the node drain workflow, then records the outcome in the status store,
//! the metrics and the custom resource's status. Categories are independent:
//! a failure in one never stops the others, and the pass reports at most one
//! error.

pub mod metrics;
pub mod status;

pub use metrics::Metrics;
pub use status::{DeploymentRecord, StatusStore};

use crate::adapters::{
    ClaimUsage, DrainScope, KubeDrainClient, KubePodExecutor, KubeResourceAdapter, NoConsumers,
};
use crate::builders;
use crate::crd::{DeploymentPhase, StorageDeployment, StorageDeploymentStatus};
use crate::drain::{DrainConfig, DrainSummary, DrainWorkflow, NodeReport};
use crate::error::{Error, ErrorAction, Result};
use crate::reconcile::{ChangeResult, ResourceOrchestrator};
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace to watch for deployments; all namespaces when unset
    pub watch_namespace: Option<String>,
    /// Delay before the next pass after a successful one
    pub requeue_interval: Duration,
    /// Delay before retrying a pass that failed transiently
    pub error_backoff: Duration,
    pub drain: DrainConfig,
    pub drain_scope: DrainScope,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            requeue_interval: Duration::from_secs(300),
            error_backoff: Duration::from_secs(15),
            drain: DrainConfig::default(),
            drain_scope: DrainScope {
                plugin_namespace: "rook-ceph".to_string(),
                plugin_selector: "app=csi-rbdplugin".to_string(),
                node_selector: None,
            },
        }
    }
}

// =============================================================================
// Context
// =============================================================================

/// Shared state handed to every reconcile
pub struct Context {
    pub client: Client,
    pub config: OperatorConfig,
    pub status: Arc<StatusStore>,
    pub metrics: Arc<Metrics>,
    pub cancel: CancellationToken,
    drain: DrainWorkflow,
}

impl Context {
    pub fn new(
        client: Client,
        config: OperatorConfig,
        status: Arc<StatusStore>,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> Self {
        let drain = DrainWorkflow::new(
            config.drain.clone(),
            Arc::new(KubeDrainClient::new(client.clone(), config.drain_scope.clone())),
            Arc::new(KubePodExecutor::new(client.clone())),
        );
        Self {
            client,
            config,
            status,
            metrics,
            cancel,
            drain,
        }
    }
}

// =============================================================================
// Pass Report
// =============================================================================

/// Combined outcome of one pass over every category
#[derive(Debug)]
pub struct PassReport {
    pub changed_categories: Vec<String>,
    pub error: Option<Error>,
    /// Per-node outcomes when the drain workflow ran
    pub drain_nodes: Option<BTreeMap<String, NodeReport>>,
    pub drain_ready_nodes: Vec<String>,
}

impl PassReport {
    pub fn collect(categories: Vec<(&str, ChangeResult)>, drain: Option<DrainSummary>) -> Self {
        let mut changed_categories = Vec::new();
        let mut errors = Vec::new();

        for (category, result) in categories {
            if result.changed {
                changed_categories.push(category.to_string());
            }
            if let Some(e) = result.error {
                errors.push(e);
            }
        }

        let (drain_nodes, drain_ready_nodes) = match drain {
            Some(summary) => {
                let ready = summary.ready_nodes();
                let (nodes, result) = summary.into_parts();
                if result.changed {
                    changed_categories.push("node-drain".to_string());
                }
                if let Some(e) = result.error {
                    errors.push(e);
                }
                (Some(nodes), ready)
            }
            None => (None, Vec::new()),
        };

        Self {
            changed_categories,
            error: Error::collapse(errors),
            drain_nodes,
            drain_ready_nodes,
        }
    }

    pub fn changed(&self) -> bool {
        !self.changed_categories.is_empty()
    }

    pub fn phase(&self) -> DeploymentPhase {
        if self.error.is_some() {
            DeploymentPhase::Degraded
        } else {
            DeploymentPhase::Ready
        }
    }

    pub fn status(&self, storage_class_count: usize) -> StorageDeploymentStatus {
        StorageDeploymentStatus {
            phase: self.phase(),
            last_reconciled: Some(Utc::now()),
            message: self.error.as_ref().map(|e| e.to_string()),
            changed: self.changed(),
            storage_class_count: storage_class_count as u32,
            drain_ready_nodes: self.drain_ready_nodes.clone(),
        }
    }
}

// =============================================================================
// Reconcile
// =============================================================================

/// One pass for one deployment
pub async fn reconcile(deployment: Arc<StorageDeployment>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let name = deployment.name_any();
    let namespace = builders::target_namespace(&deployment);
    let owner = builders::owner_label(&deployment);
    let client = ctx.client.clone();
    let cancel = &ctx.cancel;

    info!(deployment = %name, namespace = %namespace, "Starting reconcile pass");

    let mut categories = Vec::new();

    let desired_classes = builders::storage_classes(&deployment);
    let storage_class_count = desired_classes.len();
    let classes =
        KubeResourceAdapter::<StorageClass>::new(Api::all(client.clone()), None, owner.clone());
    let claims = ClaimUsage::new(client.clone());
    categories.push((
        "storage-class",
        ResourceOrchestrator::new(&classes, &claims, cancel)
            .reconcile_set(desired_classes)
            .await,
    ));

    let policies = KubeResourceAdapter::<NetworkPolicy>::new(
        Api::namespaced(client.clone(), &namespace),
        Some(namespace.clone()),
        owner.clone(),
    );
    categories.push((
        "network-policy",
        ResourceOrchestrator::new(&policies, &NoConsumers, cancel)
            .reconcile_set(builders::network_policies(&deployment))
            .await,
    ));

    let mirroring = KubeResourceAdapter::<ConfigMap>::new(
        Api::namespaced(client.clone(), &namespace),
        Some(namespace.clone()),
        owner,
    );
    categories.push((
        "mirroring",
        ResourceOrchestrator::new(&mirroring, &NoConsumers, cancel)
            .reconcile_set(builders::mirroring_config_maps(&deployment))
            .await,
    ));

    let drain = if deployment.spec.node_drain.enabled && !cancel.is_cancelled() {
        Some(ctx.drain.run(cancel).await)
    } else {
        None
    };

    let mut report = PassReport::collect(categories, drain);
    let status = report.status(storage_class_count);

    for category in &report.changed_categories {
        ctx.metrics.observe_changed(category);
    }
    ctx.metrics
        .observe_pass(report.error.is_some(), started.elapsed().as_secs_f64());
    if let Some(nodes) = report.drain_nodes.take() {
        ctx.metrics.set_drain_ready(report.drain_ready_nodes.len());
        ctx.status.record_nodes(nodes);
    }
    ctx.status.record_pass(DeploymentRecord {
        name: name.clone(),
        namespace: namespace.clone(),
        phase: status.phase,
        changed: status.changed,
        message: status.message.clone(),
        changed_categories: report.changed_categories.clone(),
        drain_ready_nodes: status.drain_ready_nodes.clone(),
        last_reconciled: Utc::now(),
    });

    if let Err(e) = patch_status(&client, &namespace, &name, &status).await {
        warn!(deployment = %name, error = %e, "Failed to update deployment status");
    }

    info!(
        deployment = %name,
        phase = %status.phase,
        changed = status.changed,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Reconcile pass finished"
    );

    match report.error {
        Some(e) => Err(e),
        None => Ok(Action::requeue(ctx.config.requeue_interval)),
    }
}

async fn patch_status(
    client: &Client,
    namespace: &str,
    name: &str,
    status: &StorageDeploymentStatus,
) -> Result<()> {
    let api: Api<StorageDeployment> = Api::namespaced(client.clone(), namespace);
    let patch = json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(|e| Error::from(e).for_resource("patch status", "StorageDeployment", name))?;
    Ok(())
}

/// Requeue policy for failed passes
pub fn error_policy(deployment: Arc<StorageDeployment>, error: &Error, ctx: Arc<Context>) -> Action {
    error!(deployment = %deployment.name_any(), error = %error, "Reconcile pass failed");
    requeue_for(error, &ctx.config)
}

pub fn requeue_for(error: &Error, config: &OperatorConfig) -> Action {
    match error.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(config.error_backoff),
        ErrorAction::RequeueAfter(delay) => Action::requeue(delay),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Drive passes for every watched deployment until shutdown.
pub async fn run(ctx: Arc<Context>) {
    let deployments: Api<StorageDeployment> = match &ctx.config.watch_namespace {
        Some(ns) => Api::namespaced(ctx.client.clone(), ns),
        None => Api::all(ctx.client.clone()),
    };

    info!(
        namespace = ctx.config.watch_namespace.as_deref().unwrap_or("*"),
        "Starting StorageDeployment controller"
    );

    Controller::new(deployments, watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(deployment = %obj.name, ?action, "Reconciled deployment");
                }
                Err(e) => {
                    warn!(error = %e, "Controller stream error");
                }
            }
        })
        .await;

    info!("StorageDeployment controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::{DrainPhase, NodeResult};
    use crate::error::AGGREGATE_ERROR_MESSAGE;

    fn ok(changed: bool) -> ChangeResult {
        ChangeResult {
            changed,
            error: None,
        }
    }

    fn failed(msg: &str) -> ChangeResult {
        ChangeResult {
            changed: false,
            error: Some(Error::Internal(msg.into())),
        }
    }

    #[test]
    fn test_clean_pass() {
        let report = PassReport::collect(
            vec![("storage-class", ok(true)), ("network-policy", ok(false))],
            None,
        );
        assert!(report.changed());
        assert_eq!(report.changed_categories, vec!["storage-class"]);
        assert_eq!(report.phase(), DeploymentPhase::Ready);
        assert!(report.drain_nodes.is_none());
    }

    #[test]
    fn test_single_failure_keeps_its_message() {
        let report = PassReport::collect(
            vec![("storage-class", failed("boom")), ("mirroring", ok(true))],
            None,
        );
        assert!(report.changed());
        assert_eq!(report.phase(), DeploymentPhase::Degraded);
        assert_eq!(
            report.status(1).message.as_deref(),
            Some("Internal error: boom")
        );
    }

    #[test]
    fn test_multiple_failures_collapse() {
        let report = PassReport::collect(
            vec![("storage-class", failed("a")), ("network-policy", failed("b"))],
            None,
        );
        assert_eq!(
            report.error.map(|e| e.to_string()).as_deref(),
            Some(AGGREGATE_ERROR_MESSAGE)
        );
    }

    #[test]
    fn test_drain_summary_folds_in() {
        let mut summary = DrainSummary::default();
        summary.nodes.insert(
            "n1".into(),
            NodeReport {
                phase: DrainPhase::DrainRequested,
                result: NodeResult::DrainReady,
            },
        );
        let report = PassReport::collect(vec![("storage-class", ok(false))], Some(summary));

        assert_eq!(report.changed_categories, vec!["node-drain"]);
        assert_eq!(report.drain_ready_nodes, vec!["n1"]);
        let status = report.status(0);
        assert_eq!(status.drain_ready_nodes, vec!["n1"]);
        assert!(status.changed);
    }

    #[test]
    fn test_requeue_policy() {
        let config = OperatorConfig::default();
        assert_eq!(
            requeue_for(&Error::Internal("x".into()), &config),
            Action::requeue(config.error_backoff)
        );
        assert_eq!(
            requeue_for(
                &Error::Cancelled {
                    target: "pass".into()
                },
                &config
            ),
            Action::await_change()
        );
    }
}
