//! Multi-Resource Orchestrator
//!
//! Drives the reconciler over a whole set of desired objects of one kind,
//! then removes owned objects that are no longer desired, gated through the
//! usage guard. Failures are collected, never short-circuited.

use crate::domain::ports::{ResourceAdapter, ResourceKey, UsageSource};
use crate::error::Error;
use crate::reconcile::guard::delete_unused;
use crate::reconcile::poll::with_cancel;
use crate::reconcile::reconciler::{reconcile_one, ChangeResult};
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reconciles one resource category for one pass
pub struct ResourceOrchestrator<'a, A: ResourceAdapter + ?Sized> {
    adapter: &'a A,
    usage: &'a dyn UsageSource,
    cancel: &'a CancellationToken,
}

impl<'a, A> ResourceOrchestrator<'a, A>
where
    A: ResourceAdapter + ?Sized,
{
    pub fn new(adapter: &'a A, usage: &'a dyn UsageSource, cancel: &'a CancellationToken) -> Self {
        Self {
            adapter,
            usage,
            cancel,
        }
    }

    /// Converge the live objects of this kind to exactly `desired`.
    ///
    /// Items are applied in sorted key order. `changed` is the OR of every
    /// committed create, update and delete.
    pub async fn reconcile_set(&self, desired: Vec<A::Object>) -> ChangeResult {
        let kind = self.adapter.kind().to_string();
        let mut changed = false;
        let mut errors: Vec<Error> = Vec::new();

        let mut ordered: BTreeMap<ResourceKey, A::Object> = BTreeMap::new();
        for object in desired {
            let key = self.adapter.key(&object);
            if ordered.insert(key.clone(), object).is_some() {
                warn!(kind = %kind, key = %key, "Duplicate desired object, keeping the last one");
            }
        }

        for (key, object) in &ordered {
            match reconcile_one(self.adapter, self.cancel, object).await {
                Ok(outcome) => changed |= outcome.changed(),
                Err(e) if e.is_cancelled() => {
                    return ChangeResult {
                        changed,
                        error: Some(e),
                    };
                }
                Err(e) => {
                    warn!(kind = %kind, key = %key, error = %e, "Failed to reconcile resource");
                    errors.push(e);
                }
            }
        }

        let desired_keys: BTreeSet<&ResourceKey> = ordered.keys().collect();
        match with_cancel(
            self.cancel,
            &format!("list owned {}", kind),
            self.adapter.list_owned(),
        )
        .await
        {
            Ok(owned) => {
                let stale: Vec<ResourceKey> = owned
                    .into_iter()
                    .filter(|key| !desired_keys.contains(key))
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();

                if !stale.is_empty() {
                    debug!(kind = %kind, count = stale.len(), "Found stale managed resources");
                    let report = delete_unused(self.adapter, self.usage, self.cancel, stale).await;
                    changed |= report.changed();
                    errors.extend(report.failures);
                }
            }
            Err(e) => errors.push(e.for_resource("list", &kind, "owned")),
        }

        if errors.is_empty() {
            info!(kind = %kind, changed, count = ordered.len(), "Reconciled resource set");
        } else {
            warn!(kind = %kind, changed, failures = errors.len(), "Resource set reconciled with failures");
        }

        ChangeResult {
            changed,
            error: Error::collapse(errors),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Consumer;
    use crate::error::AGGREGATE_ERROR_MESSAGE;
    use crate::testing::{FakeAdapter, FakeUsage, TestObject};

    #[tokio::test]
    async fn test_items_applied_in_sorted_order() {
        let adapter = FakeAdapter::new();
        let usage = FakeUsage::new(vec![]);
        let cancel = CancellationToken::new();

        let result = ResourceOrchestrator::new(&adapter, &usage, &cancel)
            .reconcile_set(vec![
                TestObject::new("c", "v"),
                TestObject::new("a", "v"),
                TestObject::new("b", "v"),
            ])
            .await;

        assert!(result.changed);
        assert!(result.is_ok());
        assert_eq!(adapter.created_order(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_unchanged_set_reports_no_change() {
        let adapter = FakeAdapter::new();
        adapter.insert(TestObject::new("a", "v").owned());
        let usage = FakeUsage::new(vec![]);
        let cancel = CancellationToken::new();

        let result = ResourceOrchestrator::new(&adapter, &usage, &cancel)
            .reconcile_set(vec![TestObject::new("a", "v")])
            .await;

        assert!(!result.changed);
        assert!(result.is_ok());
        assert_eq!(adapter.writes(), 0);
    }

    #[tokio::test]
    async fn test_single_failure_is_verbatim() {
        let adapter = FakeAdapter::new();
        adapter.fail_create("b", "quota exceeded");
        let usage = FakeUsage::new(vec![]);
        let cancel = CancellationToken::new();

        let result = ResourceOrchestrator::new(&adapter, &usage, &cancel)
            .reconcile_set(vec![TestObject::new("a", "v"), TestObject::new("b", "v")])
            .await;

        assert!(result.changed);
        assert_eq!(
            result.error.unwrap().to_string(),
            "create TestObject b: Internal error: quota exceeded"
        );
    }

    #[tokio::test]
    async fn test_many_failures_collapse_without_short_circuit() {
        let adapter = FakeAdapter::new();
        adapter.fail_create("a", "boom");
        adapter.fail_create("b", "boom");
        let usage = FakeUsage::new(vec![]);
        let cancel = CancellationToken::new();

        let result = ResourceOrchestrator::new(&adapter, &usage, &cancel)
            .reconcile_set(vec![
                TestObject::new("a", "v"),
                TestObject::new("b", "v"),
                TestObject::new("c", "v"),
            ])
            .await;

        assert!(result.changed);
        assert_eq!(result.error.unwrap().to_string(), AGGREGATE_ERROR_MESSAGE);
        assert!(adapter.stored("c").is_some());
    }

    #[tokio::test]
    async fn test_stale_owned_objects_are_removed_unless_in_use() {
        let adapter = FakeAdapter::new();
        adapter.insert(TestObject::new("keep", "v").owned());
        adapter.insert(TestObject::new("stale", "v").owned());
        adapter.insert(TestObject::new("bound", "v").owned());
        adapter.insert(TestObject::new("foreign", "v"));

        let usage = FakeUsage::new(vec![Consumer {
            kind: "PersistentVolumeClaim".into(),
            name: "db".into(),
            phase: Some("Bound".into()),
            reference: Some("bound".into()),
        }]);
        let cancel = CancellationToken::new();

        let result = ResourceOrchestrator::new(&adapter, &usage, &cancel)
            .reconcile_set(vec![TestObject::new("keep", "v")])
            .await;

        assert!(result.changed);
        assert!(result.is_ok());
        assert!(adapter.stored("stale").is_none());
        assert!(adapter.stored("bound").is_some());
        assert!(adapter.stored("foreign").is_some());
        assert_eq!(usage.scans(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_set() {
        let adapter = FakeAdapter::new();
        let usage = FakeUsage::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = ResourceOrchestrator::new(&adapter, &usage, &cancel)
            .reconcile_set(vec![TestObject::new("a", "v")])
            .await;

        assert!(!result.changed);
        assert!(result.error.unwrap().is_cancelled());
        assert_eq!(adapter.writes(), 0);
    }
}
