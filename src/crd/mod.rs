//! # Custom Resource Definitions
//!
//! CRD types for the agent operator.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `MonitoringResource` specification and feature flags
//! - `status.rs` - Status snapshot written by the controller
//! - `registry.rs` - Static registry of the kinds the operator reads

mod registry;
mod spec;
mod status;

pub use registry::{ResourceKind, ResourceRegistry};
pub use spec::{
    default_true, AppInjectionSpec, FeatureToggle, MonitoringResource, MonitoringResourceSpec,
};
pub use status::{
    CommunicationHostStatus, Condition, MonitoringPhase, MonitoringResourceStatus,
    ReconcileOutcome, ValidationFingerprint,
};
