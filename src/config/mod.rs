//! # Configuration
//!
//! Operator configuration loaded from environment variables.
//!
//! Environment variables are populated from a ConfigMap using `envFrom` in the
//! deployment. Every value has a default in [`crate::constants`].

mod operator;

pub use operator::{OperatorConfig, TimeoutPolicy};
