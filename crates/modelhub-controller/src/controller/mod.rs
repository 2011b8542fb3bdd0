//! Reconcilers for the four modelhub kinds
//!
//! Each submodule exposes `reconcile` and `error_policy` with the signatures
//! `kube::runtime::Controller::run` expects.

pub mod model;
pub mod model_reference;
pub mod model_source;
pub mod model_sync;
