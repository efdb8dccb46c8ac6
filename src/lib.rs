//! kuv - Kubernetes Upgrade Validator.
//!
//! Keeps probing a cluster's externally reachable service while the master
//! and the node fleet are upgraded in place, and validates the workload
//! before and after each upgrade cycle.

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod invoke;
pub mod k8s;
pub mod logging;
pub mod nodepool;
pub mod probe;
pub mod report;
pub mod rolling;
pub mod scenario;
pub mod template;
pub mod upgrade;
pub mod validate;
pub mod validator;
