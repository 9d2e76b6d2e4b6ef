//! Usage sources backed by the cluster

use crate::domain::ports::{Consumer, UsageSource};
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};

/// Claims and volumes referencing storage classes by name
pub struct ClaimUsage {
    claims: Api<PersistentVolumeClaim>,
    volumes: Api<PersistentVolume>,
}

impl ClaimUsage {
    pub fn new(client: Client) -> Self {
        Self {
            claims: Api::all(client.clone()),
            volumes: Api::all(client),
        }
    }
}

#[async_trait]
impl UsageSource for ClaimUsage {
    async fn consumers(&self) -> Result<Vec<Consumer>> {
        let claims = self
            .claims
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from(e).for_resource("list", "PersistentVolumeClaim", "all"))?;
        let volumes = self
            .volumes
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from(e).for_resource("list", "PersistentVolume", "all"))?;

        Ok(claims
            .items
            .iter()
            .map(claim_consumer)
            .chain(volumes.items.iter().map(volume_consumer))
            .collect())
    }
}

pub fn claim_consumer(claim: &PersistentVolumeClaim) -> Consumer {
    let name = match claim.namespace() {
        Some(ns) => format!("{}/{}", ns, claim.name_any()),
        None => claim.name_any(),
    };
    Consumer {
        kind: "PersistentVolumeClaim".to_string(),
        name,
        phase: claim.status.as_ref().and_then(|s| s.phase.clone()),
        reference: claim.spec.as_ref().and_then(|s| s.storage_class_name.clone()),
    }
}

pub fn volume_consumer(volume: &PersistentVolume) -> Consumer {
    Consumer {
        kind: "PersistentVolume".to_string(),
        name: volume.name_any(),
        phase: volume.status.as_ref().and_then(|s| s.phase.clone()),
        reference: volume.spec.as_ref().and_then(|s| s.storage_class_name.clone()),
    }
}

/// For kinds nothing in the cluster consumes
pub struct NoConsumers;

#[async_trait]
impl UsageSource for NoConsumers {
    async fn consumers(&self) -> Result<Vec<Consumer>> {
        Ok(Vec::new())
    }
}
