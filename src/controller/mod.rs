//! # Controller
//!
//! Core controller modules for the agent operator.
//!
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `error_policy`: Requeue decision after failed reconciliations
//! - `reconciler`: Core reconciliation logic
//! - `runtime`: kube-runtime controller wiring and secondary watches

pub mod backoff;
pub mod error_policy;
pub mod reconciler;
pub mod runtime;
