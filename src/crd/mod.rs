//! Custom Resource Definitions for the Storage Lifecycle Operator
//!
//! - StorageDeployment: declared storage infrastructure and drain settings

pub mod storage_deployment;

pub use storage_deployment::*;
