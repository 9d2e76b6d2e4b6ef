//! Desired-state builders
//!
//! Pure functions turning a [`StorageDeployment`] into the objects the
//! reconcile engine converges toward. Every object carries the deployment's
//! ownership label so stale ones can be found again.

use crate::adapters::resource::OwnerLabel;
use crate::crd::{NetworkPolicyTemplate, StorageDeployment};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeMap;

pub fn owner_label(deployment: &StorageDeployment) -> OwnerLabel {
    OwnerLabel::for_deployment(&deployment.name_any())
}

/// Namespace namespaced objects of a deployment live in
pub fn target_namespace(deployment: &StorageDeployment) -> String {
    deployment.namespace().unwrap_or_else(|| "default".to_string())
}

fn metadata(deployment: &StorageDeployment, name: String, namespace: Option<String>) -> ObjectMeta {
    let mut meta = ObjectMeta {
        name: Some(name),
        namespace,
        ..Default::default()
    };
    owner_label(deployment).stamp(&mut meta);
    meta
}

pub fn storage_classes(deployment: &StorageDeployment) -> Vec<StorageClass> {
    deployment
        .spec
        .storage_classes
        .iter()
        .map(|template| StorageClass {
            metadata: metadata(deployment, template.name.clone(), None),
            provisioner: template.provisioner.clone(),
            parameters: (!template.parameters.is_empty()).then(|| template.parameters.clone()),
            reclaim_policy: template.reclaim_policy.clone(),
            volume_binding_mode: template.volume_binding_mode.clone(),
            allow_volume_expansion: template.allow_volume_expansion,
            ..Default::default()
        })
        .collect()
}

pub fn network_policies(deployment: &StorageDeployment) -> Vec<NetworkPolicy> {
    let Some(template) = &deployment.spec.network_policy else {
        return Vec::new();
    };

    let name = format!("{}-storage-ingress", deployment.name_any());
    vec![NetworkPolicy {
        metadata: metadata(deployment, name, Some(target_namespace(deployment))),
        spec: Some(network_policy_spec(template)),
        ..Default::default()
    }]
}

fn network_policy_spec(template: &NetworkPolicyTemplate) -> NetworkPolicySpec {
    // The API server drops empty lists and maps, so they are left unset here
    // to compare equal with what is read back.
    let ports = (!template.ingress_ports.is_empty()).then(|| {
        template
            .ingress_ports
            .iter()
            .map(|port| NetworkPolicyPort {
                port: Some(IntOrString::Int(*port)),
                protocol: Some("TCP".to_string()),
                end_port: None,
            })
            .collect()
    });

    NetworkPolicySpec {
        pod_selector: LabelSelector {
            match_labels: (!template.pod_selector.is_empty())
                .then(|| template.pod_selector.clone()),
            match_expressions: None,
        },
        policy_types: Some(vec!["Ingress".to_string()]),
        ingress: Some(vec![NetworkPolicyIngressRule {
            from: None,
            ports,
        }]),
        egress: None,
    }
}

/// Mirroring settings published for the storage cluster's mirror daemons
pub fn mirroring_config_maps(deployment: &StorageDeployment) -> Vec<ConfigMap> {
    let Some(mirroring) = &deployment.spec.mirroring else {
        return Vec::new();
    };
    if !mirroring.enabled {
        return Vec::new();
    }

    let name = format!("{}-mirroring", deployment.name_any());
    let data = BTreeMap::from([
        ("peers".to_string(), mirroring.peers.join(",")),
        (
            "scheduleInterval".to_string(),
            mirroring.schedule_interval.clone(),
        ),
    ]);

    vec![ConfigMap {
        metadata: metadata(deployment, name, Some(target_namespace(deployment))),
        data: Some(data),
        ..Default::default()
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::resource::OWNER_LABEL_KEY;
    use crate::crd::{MirroringSpec, StorageClassTemplate, StorageDeploymentSpec};

    fn deployment(spec: StorageDeploymentSpec) -> StorageDeployment {
        let mut d = StorageDeployment::new("ceph-prod", spec);
        d.metadata.namespace = Some("rook-ceph".into());
        d
    }

    #[test]
    fn test_storage_classes() {
        let d = deployment(StorageDeploymentSpec {
            storage_classes: vec![
                StorageClassTemplate {
                    name: "fast".into(),
                    provisioner: "rbd.csi.ceph.com".into(),
                    parameters: BTreeMap::from([("pool".to_string(), "replicapool".to_string())]),
                    ..Default::default()
                },
                StorageClassTemplate {
                    name: "bare".into(),
                    provisioner: "rbd.csi.ceph.com".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        });

        let classes = storage_classes(&d);
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].name_any(), "fast");
        assert!(classes[0].metadata.namespace.is_none());
        assert_eq!(classes[0].labels()[OWNER_LABEL_KEY], "ceph-prod");
        assert!(classes[1].parameters.is_none());
    }

    #[test]
    fn test_network_policy() {
        let d = deployment(StorageDeploymentSpec {
            network_policy: Some(NetworkPolicyTemplate {
                pod_selector: BTreeMap::from([("app".to_string(), "rook-ceph-osd".to_string())]),
                ingress_ports: vec![6789, 3300],
            }),
            ..Default::default()
        });

        let policies = network_policies(&d);
        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].name_any(), "ceph-prod-storage-ingress");
        assert_eq!(policies[0].namespace().as_deref(), Some("rook-ceph"));
        let ports = policies[0].spec.as_ref().unwrap().ingress.as_ref().unwrap()[0]
            .ports
            .clone()
            .unwrap();
        assert_eq!(ports.len(), 2);

        assert!(network_policies(&deployment(StorageDeploymentSpec::default())).is_empty());
    }

    #[test]
    fn test_empty_network_policy_template_leaves_collections_unset() {
        let d = deployment(StorageDeploymentSpec {
            network_policy: Some(NetworkPolicyTemplate::default()),
            ..Default::default()
        });

        let policies = network_policies(&d);
        let spec = policies[0].spec.clone().unwrap();
        assert!(spec.pod_selector.match_labels.is_none());
        let rules = spec.ingress.unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].ports.is_none());

        // what the API server hands back for this object
        let observed: NetworkPolicySpec = serde_json::from_value(serde_json::json!({
            "podSelector": {},
            "policyTypes": ["Ingress"],
            "ingress": [{}]
        }))
        .unwrap();
        assert_eq!(policies[0].spec.as_ref(), Some(&observed));
    }

    #[test]
    fn test_mirroring_disabled_builds_nothing() {
        let mut spec = StorageDeploymentSpec {
            mirroring: Some(MirroringSpec {
                enabled: true,
                peers: vec!["site-b".into(), "site-c".into()],
                schedule_interval: "30m".into(),
            }),
            ..Default::default()
        };
        let maps = mirroring_config_maps(&deployment(spec.clone()));
        assert_eq!(maps[0].data.as_ref().unwrap()["peers"], "site-b,site-c");

        if let Some(m) = spec.mirroring.as_mut() {
            m.enabled = false;
        }
        assert!(mirroring_config_maps(&deployment(spec)).is_empty());
    }
}
