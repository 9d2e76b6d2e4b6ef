//! Reconcile Engine
//!
//! Generic declarative converge machinery shared by every managed resource
//! category and by the node drain workflow.

pub mod guard;
pub mod orchestrator;
pub mod poll;
pub mod reconciler;

pub use guard::{delete_unused, filter_deletable, DeleteReport, UsageIndex};
pub use orchestrator::ResourceOrchestrator;
pub use poll::{poll, with_cancel, PollSpec};
pub use reconciler::{reconcile_one, ChangeResult, Outcome};
