//! Reconcilers for Model, ModelSource, ModelSync and ModelReference
//!
//! The reconcilers talk to the cluster only through [`KubeClient`] and resolve
//! Models and ModelSources through [`ModelRegistry`], so every code path can
//! run against mocks or the in-memory fake cluster in tests.

#![deny(missing_docs)]

pub mod client;
pub mod context;
pub mod controller;
pub mod datasets;
pub mod events;
pub mod mapper;
pub mod registry;
pub mod status;
pub mod translate;

#[cfg(test)]
mod testing;

pub use client::{KubeClient, KubeClientImpl};
pub use context::{Context, ContextBuilder};
pub use registry::{InMemoryRegistry, KubeRegistry, ModelRegistry};
