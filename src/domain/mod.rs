//! Domain Module
//!
//! Core identity, diff and port types shared by the reconcile engine,
//! the drain workflow and the Kubernetes adapters.

pub mod ports;

pub use ports::*;
