//! Node drain state machine
//!
//! Nothing here is persisted. A node's state is derived on every pass from
//! its labels and annotations, and transitions are pure functions so they
//! can be tested without an API server.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label and annotation keys the workflow reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainKeys {
    /// Label marking nodes under eviction supervision
    pub watch_label: String,
    /// Annotation an external controller sets to request a drain
    pub drain_request_annotation: String,
    /// Annotation this operator sets once the node is safe for maintenance
    pub drain_ready_annotation: String,
}

impl Default for DrainKeys {
    fn default() -> Self {
        Self {
            watch_label: "lifecycle.billyronks.io/csi-watch".to_string(),
            drain_request_annotation: "lifecycle.billyronks.io/drain-request".to_string(),
            drain_ready_annotation: "lifecycle.billyronks.io/drain-ready".to_string(),
        }
    }
}

// =============================================================================
// Derived State
// =============================================================================

/// Facts read off a node's metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDrainState {
    pub watch_label_present: bool,
    pub drain_requested: bool,
    pub drain_ready: bool,
}

impl NodeDrainState {
    pub fn from_metadata(
        keys: &DrainKeys,
        labels: &BTreeMap<String, String>,
        annotations: &BTreeMap<String, String>,
    ) -> Self {
        Self {
            watch_label_present: labels.contains_key(&keys.watch_label),
            drain_requested: is_true(annotations.get(&keys.drain_request_annotation)),
            drain_ready: is_true(annotations.get(&keys.drain_ready_annotation)),
        }
    }

    /// A node only counts as ready once the watch label is gone too; a stale
    /// ready annotation next to the label means eviction has to run again.
    pub fn phase(&self) -> DrainPhase {
        match (self.drain_requested, self.drain_ready, self.watch_label_present) {
            (true, true, false) => DrainPhase::DrainReady,
            (true, _, _) => DrainPhase::DrainRequested,
            (false, _, true) => DrainPhase::Watched,
            (false, _, false) => DrainPhase::NoWatch,
        }
    }
}

fn is_true(value: Option<&String>) -> bool {
    value.map(String::as_str) == Some("true")
}

/// Where a node stands at the start of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DrainPhase {
    /// Not supervised yet
    NoWatch,
    /// Supervised, nothing requested
    Watched,
    /// Drain requested, eviction not finished
    DrainRequested,
    /// Eviction finished and reported
    DrainReady,
}

impl std::fmt::Display for DrainPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrainPhase::NoWatch => write!(f, "no-watch"),
            DrainPhase::Watched => write!(f, "watched"),
            DrainPhase::DrainRequested => write!(f, "drain-requested"),
            DrainPhase::DrainReady => write!(f, "drain-ready"),
        }
    }
}

/// What the workflow does with a node this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    AddWatchLabel,
    None,
    Evict,
}

pub fn plan(phase: DrainPhase) -> NodeAction {
    match phase {
        DrainPhase::NoWatch => NodeAction::AddWatchLabel,
        DrainPhase::Watched | DrainPhase::DrainReady => NodeAction::None,
        DrainPhase::DrainRequested => NodeAction::Evict,
    }
}

// =============================================================================
// Eviction Sequence
// =============================================================================

/// Steps of the eviction sequence, in their only legal order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EvictionStep {
    VolumesDetaching,
    PodEvictionVerified,
    DaemonsetConsistent,
    DrainReady,
}

impl EvictionStep {
    pub const FIRST: EvictionStep = EvictionStep::VolumesDetaching;

    pub fn next(self) -> Option<EvictionStep> {
        match self {
            EvictionStep::VolumesDetaching => Some(EvictionStep::PodEvictionVerified),
            EvictionStep::PodEvictionVerified => Some(EvictionStep::DaemonsetConsistent),
            EvictionStep::DaemonsetConsistent => Some(EvictionStep::DrainReady),
            EvictionStep::DrainReady => None,
        }
    }
}

impl std::fmt::Display for EvictionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvictionStep::VolumesDetaching => write!(f, "volume detach"),
            EvictionStep::PodEvictionVerified => write!(f, "plugin pod eviction"),
            EvictionStep::DaemonsetConsistent => write!(f, "daemonset consistency"),
            EvictionStep::DrainReady => write!(f, "drain-ready marking"),
        }
    }
}

/// How a step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed,
}

/// Where the sequence goes after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Advance(EvictionStep),
    Complete,
    /// Stop for this node; the next pass starts again from the node's state
    Abort(EvictionStep),
}

pub fn transition(step: EvictionStep, outcome: StepOutcome) -> Transition {
    match outcome {
        StepOutcome::Failed => Transition::Abort(step),
        StepOutcome::Succeeded => match step.next() {
            Some(next) => Transition::Advance(next),
            None => Transition::Complete,
        },
    }
}
