//! Managed-Resource Reconciler
//!
//! Applies one desired object: fetch, diff the owned fields, then create,
//! update or leave it alone. Works for any kind through [`ResourceAdapter`].

use crate::domain::ports::ResourceAdapter;
use crate::error::{Error, Result};
use crate::reconcile::poll::with_cancel;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// =============================================================================
// Outcomes
// =============================================================================

/// What a single reconcile did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Object was absent and has been created
    Created,
    /// Mutable owned fields differed and have been written
    Updated,
    /// Owned fields already match
    Unchanged,
    /// Only immutable fields differ; the update was deliberately skipped
    SkippedImmutable,
}

impl Outcome {
    /// True iff a mutation was committed
    pub fn changed(self) -> bool {
        matches!(self, Outcome::Created | Outcome::Updated)
    }
}

/// Uniform result of a reconcile operation
#[derive(Debug, Default)]
pub struct ChangeResult {
    /// True iff at least one mutation was committed
    pub changed: bool,
    pub error: Option<Error>,
}

impl ChangeResult {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<bool> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.changed),
        }
    }
}

impl From<Result<Outcome>> for ChangeResult {
    fn from(result: Result<Outcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                changed: outcome.changed(),
                error: None,
            },
            Err(e) => Self {
                changed: false,
                error: Some(e),
            },
        }
    }
}

// =============================================================================
// Reconcile One
// =============================================================================

/// Converge one live object toward `desired`.
pub async fn reconcile_one<A>(
    adapter: &A,
    cancel: &CancellationToken,
    desired: &A::Object,
) -> Result<Outcome>
where
    A: ResourceAdapter + ?Sized,
{
    let kind = adapter.kind().to_string();
    let key = adapter.key(desired);
    let target = format!("{} {}", kind, key);

    let observed = with_cancel(cancel, &target, adapter.get(&key))
        .await
        .map_err(|e| e.for_resource("get", &kind, &key))?;

    let observed = match observed {
        None => {
            with_cancel(cancel, &target, adapter.create(desired))
                .await
                .map_err(|e| e.for_resource("create", &kind, &key))?;
            info!(kind = %kind, key = %key, "Created managed resource");
            return Ok(Outcome::Created);
        }
        Some(observed) => observed,
    };

    let diff = adapter.diff(desired, &observed);
    if diff.is_empty() {
        debug!(kind = %kind, key = %key, "Managed resource up to date");
        return Ok(Outcome::Unchanged);
    }

    let immutable = diff.immutable_fields();
    if !immutable.is_empty() {
        warn!(
            kind = %kind,
            key = %key,
            fields = ?immutable,
            "Desired change touches immutable fields, leaving them as they are"
        );
    }
    if !diff.has_mutable() {
        return Ok(Outcome::SkippedImmutable);
    }

    let merged = adapter.merge(desired, observed);
    with_cancel(cancel, &target, adapter.update(&merged))
        .await
        .map_err(|e| e.for_resource("update", &kind, &key))?;

    info!(kind = %kind, key = %key, "Updated managed resource");
    Ok(Outcome::Updated)
}
