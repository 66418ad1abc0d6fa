//! Run orchestration: registry adapters by host and the reconciliation pass

pub mod adapters;
pub mod orchestrator;

pub use adapters::{RegistrySet, create_default_registries};
pub use orchestrator::{ReconcileReport, Reconciler, SkippedRepository};
