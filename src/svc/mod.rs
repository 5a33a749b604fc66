//! # Services module
//!
//! This module provide services to reconcile database instances on kubernetes
//! and helpers to do so.
pub mod cfg;
pub mod crd;
pub mod database;
pub mod k8s;
pub mod telemetry;
