//! Multi-registry image version reconciliation.
//!
//! Given the set of image references deployed somewhere, this crate works out
//! whether a newer build exists in each image's registry, how large the jump
//! is, and which stale tags can be removed under a retention policy.
//!
//! - [`image`]: image reference parsing
//! - [`version`]: tag parsing, registry adapters, inventory cache, latest resolution, classification
//! - [`retention`]: cleanup planning and deletion
//! - [`reconcile`]: the per-run orchestrator
//! - [`context`]: run-wide clock, deadline, cancellation and connection limits

pub mod config;
pub mod context;
pub mod image;
pub mod logging;
pub mod reconcile;
pub mod retention;
pub mod version;
