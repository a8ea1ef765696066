//! Agent Operator Library
//!
//! Control-plane core of the monitoring agent operator: the `MonitoringResource`
//! reconciler, the pod injection webhook and the pieces they share.
//! Tests are included in the module files and under `tests/`.

pub mod binding;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod monitoring;
pub mod observability;
pub mod provisioner;
pub mod server;
pub mod webhook;

#[cfg(test)]
mod testing;
