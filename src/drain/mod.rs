//! Node Drain
//!
//! Safely evicts storage-plugin workload from nodes scheduled for
//! maintenance and reports them ready once nothing is left attached.

pub mod mounts;
pub mod state;
pub mod workflow;

pub use mounts::{parse_mount_table, raw_block_targets, MountEntry, RAW_BLOCK_MARKER};
pub use state::{DrainKeys, DrainPhase, EvictionStep, NodeAction, NodeDrainState};
pub use workflow::{DrainConfig, DrainSummary, DrainWorkflow, NodeReport, NodeResult};
