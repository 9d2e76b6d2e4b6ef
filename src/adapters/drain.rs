//! Drain ports backed by the cluster
//!
//! [`KubeDrainClient`] covers the node, pod and volume-attachment calls;
//! [`KubePodExecutor`] runs commands in plugin containers over the exec
//! websocket.

use crate::domain::ports::{
    DrainClient, ExecOutput, NodeInfo, PodExecutor, PodRef, VolumeAttachmentInfo,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::storage::v1::VolumeAttachment;
use kube::api::{Api, AttachParams, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Where the storage-plugin pods live and which nodes are considered
#[derive(Debug, Clone)]
pub struct DrainScope {
    /// Namespace of the storage-plugin DaemonSet
    pub plugin_namespace: String,
    /// Label selector matching the storage-plugin pods
    pub plugin_selector: String,
    /// Optional label selector restricting the nodes evaluated
    pub node_selector: Option<String>,
}

pub struct KubeDrainClient {
    nodes: Api<Node>,
    pods: Api<Pod>,
    attachments: Api<VolumeAttachment>,
    scope: DrainScope,
}

impl KubeDrainClient {
    pub fn new(client: Client, scope: DrainScope) -> Self {
        Self {
            nodes: Api::all(client.clone()),
            pods: Api::namespaced(client.clone(), &scope.plugin_namespace),
            attachments: Api::all(client),
            scope,
        }
    }

    async fn patch_node_metadata(
        &self,
        node: &str,
        section: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let patch = metadata_patch(section, key, value);
        self.nodes
            .patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from(e).for_resource("patch", "Node", node))?;
        Ok(())
    }
}

/// Merge patch setting one metadata entry; `None` becomes `null`, which
/// removes the key.
pub fn metadata_patch(section: &str, key: &str, value: Option<&str>) -> Value {
    let mut entries = Map::new();
    entries.insert(
        key.to_string(),
        value.map_or(Value::Null, |v| Value::String(v.to_string())),
    );
    let mut metadata = Map::new();
    metadata.insert(section.to_string(), Value::Object(entries));
    json!({ "metadata": metadata })
}

fn not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl DrainClient for KubeDrainClient {
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>> {
        let mut params = ListParams::default();
        if let Some(selector) = &self.scope.node_selector {
            params = params.labels(selector);
        }
        let nodes = self.nodes.list(&params).await?;
        Ok(nodes
            .items
            .into_iter()
            .map(|node| NodeInfo {
                name: node.name_any(),
                labels: node.metadata.labels.unwrap_or_default(),
                annotations: node.metadata.annotations.unwrap_or_default(),
            })
            .collect())
    }

    async fn set_node_label(&self, node: &str, key: &str, value: Option<&str>) -> Result<()> {
        self.patch_node_metadata(node, "labels", key, value).await
    }

    async fn set_node_annotation(
        &self,
        node: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        self.patch_node_metadata(node, "annotations", key, value).await
    }

    async fn plugin_pods_on_node(&self, node: &str) -> Result<Vec<PodRef>> {
        let params = ListParams::default()
            .labels(&self.scope.plugin_selector)
            .fields(&format!("spec.nodeName={}", node));
        let pods = self.pods.list(&params).await?;
        Ok(pods
            .items
            .iter()
            .map(|pod| PodRef {
                namespace: pod
                    .namespace()
                    .unwrap_or_else(|| self.scope.plugin_namespace.clone()),
                name: pod.name_any(),
            })
            .collect())
    }

    async fn delete_pod(&self, pod: &PodRef) -> Result<bool> {
        match self.pods.delete(&pod.name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) if not_found(&e) => {
                debug!(pod = %pod, "Pod already gone");
                Ok(false)
            }
            Err(e) => Err(Error::from(e).for_resource("delete", "Pod", pod)),
        }
    }

    async fn list_volume_attachments(&self) -> Result<Vec<VolumeAttachmentInfo>> {
        let list = self.attachments.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|va| VolumeAttachmentInfo {
                name: va.name_any(),
                attacher: va.spec.attacher,
                node_name: va.spec.node_name,
            })
            .collect())
    }

    async fn delete_volume_attachment(&self, name: &str) -> Result<bool> {
        match self.attachments.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(e) if not_found(&e) => Ok(false),
            Err(e) => Err(Error::from(e).for_resource("delete", "VolumeAttachment", name)),
        }
    }
}

// =============================================================================
// Exec
// =============================================================================

pub struct KubePodExecutor {
    client: Client,
}

impl KubePodExecutor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

async fn read_stream<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<String> {
    let mut out = String::new();
    if let Some(mut reader) = reader {
        reader.read_to_string(&mut out).await?;
    }
    Ok(out)
}

#[async_trait]
impl PodExecutor for KubePodExecutor {
    async fn exec(&self, pod: &PodRef, container: &str, command: &[String]) -> Result<ExecOutput> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let params = AttachParams::default()
            .container(container)
            .stdin(false)
            .stdout(true)
            .stderr(true);

        let exec_error = |reason: String| Error::Exec {
            pod: pod.to_string(),
            command: command.to_vec(),
            reason,
        };

        let mut attached = pods
            .exec(&pod.name, command.to_vec(), &params)
            .await
            .map_err(|e| exec_error(e.to_string()))?;

        let stdout_reader = attached.stdout();
        let stderr_reader = attached.stderr();
        let (stdout, stderr) =
            tokio::try_join!(read_stream(stdout_reader), read_stream(stderr_reader))?;

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };

        if let Some(status) = status {
            if status.status.as_deref() == Some("Failure") {
                let reason = status
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| stderr.trim().to_string());
                return Err(exec_error(reason));
            }
        }

        Ok(ExecOutput { stdout, stderr })
    }
}
