//! Resource-Usage Guard
//!
//! Decides whether stale managed resources may be removed by scanning the
//! objects that consume them. The index is rebuilt from a fresh scan before
//! every delete decision.

use crate::domain::ports::{Consumer, ResourceAdapter, ResourceKey, UsageSource};
use crate::error::{Error, Result};
use crate::reconcile::poll::with_cancel;
use std::collections::{BTreeMap, BTreeSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Usage Index
// =============================================================================

/// Candidate name to "may be deleted"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageIndex {
    deletable: BTreeMap<String, bool>,
}

impl UsageIndex {
    /// Mark every candidate referenced by a bound consumer as in use.
    pub fn build(candidates: &BTreeSet<String>, consumers: &[Consumer]) -> Self {
        let mut deletable: BTreeMap<String, bool> =
            candidates.iter().map(|name| (name.clone(), true)).collect();

        for consumer in consumers {
            let reference = match consumer.reference.as_deref() {
                Some(r) if !r.is_empty() => r,
                _ => {
                    debug!(
                        kind = %consumer.kind,
                        name = %consumer.name,
                        "Consumer has no reference, skipping"
                    );
                    continue;
                }
            };

            if !consumer.is_bound() {
                continue;
            }

            if let Some(entry) = deletable.get_mut(reference) {
                if *entry {
                    debug!(
                        candidate = %reference,
                        kind = %consumer.kind,
                        consumer = %consumer.name,
                        "Candidate is still in use"
                    );
                }
                *entry = false;
            }
        }

        Self { deletable }
    }

    pub fn is_deletable(&self, name: &str) -> bool {
        self.deletable.get(name).copied().unwrap_or(false)
    }

    pub fn deletable(&self) -> impl Iterator<Item = &str> {
        self.deletable
            .iter()
            .filter(|(_, ok)| **ok)
            .map(|(name, _)| name.as_str())
    }

    pub fn in_use(&self) -> impl Iterator<Item = &str> {
        self.deletable
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(name, _)| name.as_str())
    }

    pub fn into_map(self) -> BTreeMap<String, bool> {
        self.deletable
    }
}

/// Scan consumers now and decide which candidates may be deleted.
pub async fn filter_deletable(
    source: &dyn UsageSource,
    cancel: &CancellationToken,
    candidates: &BTreeSet<String>,
) -> Result<UsageIndex> {
    if candidates.is_empty() {
        return Ok(UsageIndex::default());
    }
    let consumers = with_cancel(cancel, "consumer scan", source.consumers()).await?;
    Ok(UsageIndex::build(candidates, &consumers))
}

// =============================================================================
// Guarded Deletion
// =============================================================================

/// Result of a best-effort deletion sweep
#[derive(Debug, Default)]
pub struct DeleteReport {
    /// Deleted by this sweep
    pub deleted: Vec<ResourceKey>,
    /// Already gone when the delete was issued
    pub already_gone: Vec<ResourceKey>,
    /// Kept because a bound consumer still references them
    pub in_use: Vec<ResourceKey>,
    pub failures: Vec<Error>,
}

impl DeleteReport {
    pub fn changed(&self) -> bool {
        !self.deleted.is_empty()
    }
}

/// Delete every candidate that no bound consumer references.
///
/// Failures are counted and the sweep continues; deletes already issued are
/// never rolled back.
pub async fn delete_unused<A>(
    adapter: &A,
    source: &dyn UsageSource,
    cancel: &CancellationToken,
    candidates: Vec<ResourceKey>,
) -> DeleteReport
where
    A: ResourceAdapter + ?Sized,
{
    let mut report = DeleteReport::default();
    if candidates.is_empty() {
        return report;
    }

    let kind = adapter.kind().to_string();
    let names: BTreeSet<String> = candidates.iter().map(|k| k.name.clone()).collect();

    let index = match filter_deletable(source, cancel, &names).await {
        Ok(index) => index,
        Err(e) => {
            report.failures.push(e.for_resource("scan consumers of", &kind, "candidates"));
            return report;
        }
    };

    for key in candidates {
        if !index.is_deletable(&key.name) {
            info!(kind = %kind, key = %key, "Stale resource still in use, keeping it");
            report.in_use.push(key);
            continue;
        }

        let target = format!("{} {}", kind, key);
        match with_cancel(cancel, &target, adapter.delete(&key)).await {
            Ok(true) => {
                info!(kind = %kind, key = %key, "Deleted stale resource");
                report.deleted.push(key);
            }
            Ok(false) => {
                debug!(kind = %kind, key = %key, "Stale resource already gone");
                report.already_gone.push(key);
            }
            Err(e) if e.is_cancelled() => {
                report.failures.push(e);
                break;
            }
            Err(e) if e.is_not_found() => report.already_gone.push(key),
            Err(e) => {
                warn!(kind = %kind, key = %key, error = %e, "Failed to delete stale resource");
                report.failures.push(e.for_resource("delete", &kind, &key));
            }
        }
    }

    report
}
