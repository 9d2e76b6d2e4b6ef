//! API Module
//!
//! Read-only REST API exposing reconcile and drain status.

pub mod rest;
pub mod server;

pub use rest::{RestRouter, ApiErrorResponse};
pub use server::{ApiServer, ApiServerConfig};
