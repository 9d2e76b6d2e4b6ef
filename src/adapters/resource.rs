//! Generic Kubernetes resource adapter
//!
//! Implements [`ResourceAdapter`] for any kind with [`ManagedFields`] rules,
//! on top of a scoped `kube::Api`.

use crate::adapters::fields::ManagedFields;
use crate::domain::ports::{ResourceAdapter, ResourceDiff, ResourceKey};
use crate::error::Result;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::core::ApiResource;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::debug;

/// Label key marking objects this operator owns
pub const OWNER_LABEL_KEY: &str = "lifecycle.billyronks.io/managed-by";

/// Ownership marker stamped on created objects and used to list them back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerLabel {
    pub key: String,
    pub value: String,
}

impl OwnerLabel {
    /// Marker for objects owned by the named deployment
    pub fn for_deployment(deployment: &str) -> Self {
        Self {
            key: OWNER_LABEL_KEY.to_string(),
            value: deployment.to_string(),
        }
    }

    pub fn selector(&self) -> String {
        format!("{}={}", self.key, self.value)
    }

    pub fn stamp(&self, meta: &mut k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) {
        meta.labels
            .get_or_insert_with(BTreeMap::new)
            .insert(self.key.clone(), self.value.clone());
    }
}

/// Resource adapter over a `kube::Api` for one kind
pub struct KubeResourceAdapter<K> {
    api: Api<K>,
    kind: String,
    namespace: Option<String>,
    owner: OwnerLabel,
}

impl<K> KubeResourceAdapter<K>
where
    K: Resource<DynamicType = ()>,
{
    /// `namespace` must match the scope `api` was built with.
    pub fn new(api: Api<K>, namespace: Option<String>, owner: OwnerLabel) -> Self {
        Self {
            api,
            kind: K::kind(&()).into_owned(),
            namespace,
            owner,
        }
    }
}

impl KubeResourceAdapter<DynamicObject> {
    /// Adapter for a custom resource kind only known at runtime
    pub fn dynamic(
        api: Api<DynamicObject>,
        resource: &ApiResource,
        namespace: Option<String>,
        owner: OwnerLabel,
    ) -> Self {
        Self {
            api,
            kind: resource.kind.clone(),
            namespace,
            owner,
        }
    }
}

impl<K> KubeResourceAdapter<K> {
    pub fn owner(&self) -> &OwnerLabel {
        &self.owner
    }
}

#[async_trait]
impl<K> ResourceAdapter for KubeResourceAdapter<K>
where
    K: Resource + ManagedFields + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Send + Sync,
{
    type Object = K;

    fn kind(&self) -> &str {
        &self.kind
    }

    fn key(&self, object: &K) -> ResourceKey {
        ResourceKey {
            namespace: object.namespace().or_else(|| self.namespace.clone()),
            name: object.name_any(),
        }
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<K>> {
        Ok(self.api.get_opt(&key.name).await?)
    }

    async fn create(&self, desired: &K) -> Result<()> {
        let mut object = desired.clone();
        self.owner.stamp(object.meta_mut());
        self.api.create(&PostParams::default(), &object).await?;
        Ok(())
    }

    async fn update(&self, object: &K) -> Result<()> {
        // observed resourceVersion rides along, so a concurrent write fails
        // with a conflict instead of being overwritten
        self.api
            .replace(&object.name_any(), &PostParams::default(), object)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> Result<bool> {
        match self.api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                debug!(kind = %self.kind, key = %key, "Delete target already gone");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_owned(&self) -> Result<Vec<ResourceKey>> {
        let params = ListParams::default().labels(&self.owner.selector());
        let list = self.api.list(&params).await?;
        Ok(list.items.iter().map(|o| self.key(o)).collect())
    }

    fn diff(&self, desired: &K, observed: &K) -> ResourceDiff {
        K::diff_owned(desired, observed)
    }

    fn merge(&self, desired: &K, observed: K) -> K {
        K::merge_owned(desired, observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_owner_label() {
        let owner = OwnerLabel::for_deployment("ceph-prod");
        assert_eq!(owner.selector(), "lifecycle.billyronks.io/managed-by=ceph-prod");

        let mut meta = ObjectMeta::default();
        owner.stamp(&mut meta);
        owner.stamp(&mut meta);
        let labels = meta.labels.unwrap_or_default();
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[OWNER_LABEL_KEY], "ceph-prod");
    }
}
