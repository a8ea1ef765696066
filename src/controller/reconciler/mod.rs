//! # Reconciler
//!
//! Core reconciliation logic for `MonitoringResource` objects.
//!
//! The reconciler:
//! - Validates the credential secret against the monitoring API
//! - Records connection info, agent version and conditions in the status
//! - Provisions managed secrets into every namespace bound to the resource
//! - Removes those secrets again when the resource goes away
//!
//! See [`reconcile`] for the step-by-step flow.

pub mod reconcile;
pub mod status;
pub mod types;

pub use status::{
    InvalidCredentialReason, StatusWrite, CONDITION_DATA_INGEST_READY, CONDITION_READY,
    CONDITION_TOKENS_VALID, MESSAGE_NO_FEATURES,
};
pub use types::{BackoffState, ReconcileError, ReconcileRequest, Reconciler, TriggerSource};
