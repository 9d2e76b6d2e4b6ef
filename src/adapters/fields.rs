//! Owned-field rules per managed kind
//!
//! Only the fields this operator sets are compared and written back.
//! Anything the API server or another controller adds to an object is left
//! alone, and an optional field the desired object leaves unset is not
//! owned at all.

use crate::domain::ports::{map_subset_differs, option_differs, ResourceDiff};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde_json::Value;
use std::collections::BTreeMap;

/// Diff and merge over the fields of a kind this operator owns
pub trait ManagedFields: Sized {
    fn diff_owned(desired: &Self, observed: &Self) -> ResourceDiff;

    /// Copy the mutable owned fields of `desired` onto `observed`
    fn merge_owned(desired: &Self, observed: Self) -> Self;
}

// =============================================================================
// Metadata
// =============================================================================

pub fn diff_metadata(desired: &ObjectMeta, observed: &ObjectMeta) -> ResourceDiff {
    let mut diff = ResourceDiff::new();
    diff.check(
        "metadata.labels",
        true,
        map_entries_differ(&desired.labels, &observed.labels),
    )
    .check(
        "metadata.annotations",
        true,
        map_entries_differ(&desired.annotations, &observed.annotations),
    );
    diff
}

pub fn merge_metadata(desired: &ObjectMeta, observed: &mut ObjectMeta) {
    merge_entries(&desired.labels, &mut observed.labels);
    merge_entries(&desired.annotations, &mut observed.annotations);
}

fn map_entries_differ(
    desired: &Option<BTreeMap<String, String>>,
    observed: &Option<BTreeMap<String, String>>,
) -> bool {
    match desired {
        Some(desired) => map_subset_differs(desired, observed.as_ref().unwrap_or(&BTreeMap::new())),
        None => false,
    }
}

fn merge_entries(
    desired: &Option<BTreeMap<String, String>>,
    observed: &mut Option<BTreeMap<String, String>>,
) {
    if let Some(desired) = desired {
        observed
            .get_or_insert_with(BTreeMap::new)
            .extend(desired.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

/// True when `desired` is not contained in `observed`.
///
/// Objects compare key by key so fields defaulted server-side do not count
/// as drift; every other value must match exactly.
pub fn json_subset_differs(desired: &Value, observed: &Value) -> bool {
    match (desired, observed) {
        (Value::Object(desired), Value::Object(observed)) => desired.iter().any(|(k, v)| {
            observed
                .get(k)
                .map_or(!v.is_null(), |o| json_subset_differs(v, o))
        }),
        _ => desired != observed,
    }
}

// =============================================================================
// Kinds
// =============================================================================

impl ManagedFields for StorageClass {
    fn diff_owned(desired: &Self, observed: &Self) -> ResourceDiff {
        let mut diff = diff_metadata(&desired.metadata, &observed.metadata);
        diff.check("provisioner", false, desired.provisioner != observed.provisioner)
            .check(
                "parameters",
                false,
                option_differs(&desired.parameters, &observed.parameters),
            )
            .check(
                "reclaimPolicy",
                false,
                option_differs(&desired.reclaim_policy, &observed.reclaim_policy),
            )
            .check(
                "volumeBindingMode",
                false,
                option_differs(&desired.volume_binding_mode, &observed.volume_binding_mode),
            )
            .check(
                "mountOptions",
                false,
                option_differs(&desired.mount_options, &observed.mount_options),
            )
            .check(
                "allowVolumeExpansion",
                true,
                option_differs(&desired.allow_volume_expansion, &observed.allow_volume_expansion),
            );
        diff
    }

    fn merge_owned(desired: &Self, mut observed: Self) -> Self {
        merge_metadata(&desired.metadata, &mut observed.metadata);
        if desired.allow_volume_expansion.is_some() {
            observed.allow_volume_expansion = desired.allow_volume_expansion;
        }
        observed
    }
}

impl ManagedFields for NetworkPolicy {
    fn diff_owned(desired: &Self, observed: &Self) -> ResourceDiff {
        let mut diff = diff_metadata(&desired.metadata, &observed.metadata);
        diff.check("spec", true, option_differs(&desired.spec, &observed.spec));
        diff
    }

    fn merge_owned(desired: &Self, mut observed: Self) -> Self {
        merge_metadata(&desired.metadata, &mut observed.metadata);
        if desired.spec.is_some() {
            observed.spec = desired.spec.clone();
        }
        observed
    }
}

impl ManagedFields for Ingress {
    fn diff_owned(desired: &Self, observed: &Self) -> ResourceDiff {
        let mut diff = diff_metadata(&desired.metadata, &observed.metadata);
        diff.check("spec", true, option_differs(&desired.spec, &observed.spec));
        diff
    }

    fn merge_owned(desired: &Self, mut observed: Self) -> Self {
        merge_metadata(&desired.metadata, &mut observed.metadata);
        if desired.spec.is_some() {
            observed.spec = desired.spec.clone();
        }
        observed
    }
}

impl ManagedFields for ConfigMap {
    fn diff_owned(desired: &Self, observed: &Self) -> ResourceDiff {
        let mut diff = diff_metadata(&desired.metadata, &observed.metadata);
        diff.check("data", true, option_differs(&desired.data, &observed.data))
            .check(
                "binaryData",
                true,
                option_differs(&desired.binary_data, &observed.binary_data),
            );
        diff
    }

    fn merge_owned(desired: &Self, mut observed: Self) -> Self {
        merge_metadata(&desired.metadata, &mut observed.metadata);
        if desired.data.is_some() {
            observed.data = desired.data.clone();
        }
        if desired.binary_data.is_some() {
            observed.binary_data = desired.binary_data.clone();
        }
        observed
    }
}

impl ManagedFields for Secret {
    fn diff_owned(desired: &Self, observed: &Self) -> ResourceDiff {
        let mut diff = diff_metadata(&desired.metadata, &observed.metadata);
        diff.check("data", true, option_differs(&desired.data, &observed.data))
            .check("type", false, option_differs(&desired.type_, &observed.type_));
        diff
    }

    fn merge_owned(desired: &Self, mut observed: Self) -> Self {
        merge_metadata(&desired.metadata, &mut observed.metadata);
        if desired.data.is_some() {
            observed.data = desired.data.clone();
        }
        observed
    }
}

/// Storage-cluster custom resources: only `spec` is owned.
impl ManagedFields for DynamicObject {
    fn diff_owned(desired: &Self, observed: &Self) -> ResourceDiff {
        let mut diff = diff_metadata(&desired.metadata, &observed.metadata);
        let differs = match desired.data.get("spec") {
            Some(spec) => json_subset_differs(spec, observed.data.get("spec").unwrap_or(&Value::Null)),
            None => false,
        };
        diff.check("spec", true, differs);
        diff
    }

    fn merge_owned(desired: &Self, mut observed: Self) -> Self {
        merge_metadata(&desired.metadata, &mut observed.metadata);
        if let Some(spec) = desired.data.get("spec") {
            match observed.data.as_object_mut() {
                Some(data) => {
                    data.insert("spec".to_string(), spec.clone());
                }
                None => observed.data = serde_json::json!({ "spec": spec }),
            }
        }
        observed
    }
}
