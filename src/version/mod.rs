//! Version reconciliation layer for container image tags
//!
//! This module provides the core functionality for fetching tag inventories from
//! registries, caching them for the duration of a run, and working out which tag
//! is the newest build of a repository.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Registry   │────▶│  Inventory  │◀────│  Resolver   │
//! │  (fetch)    │     │  (cache)    │     │  (latest)   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                                       │
//!        ▼                                       ▼
//! ┌─────────────┐                         ┌─────────────┐
//! │ Registries  │                         │ Classifier  │
//! │(ocir, v2)   │                         │(update type)│
//! └─────────────┘                         └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`parser`]: Semantic/Opaque tag classification
//! - [`types`]: `TagRecord` and `RepositoryInventory`
//! - [`registry`]: Registry trait implemented by every provider adapter
//! - [`registries`]: Concrete adapters (OCIR bulk API, OCI distribution v2)
//! - [`inventory`]: Single-flight, run-scoped inventory cache
//! - [`resolver`]: Latest tag resolution across mixed tag types
//! - [`classifier`]: Update magnitude and age
//! - [`error`]: Error types for registry operations

pub mod classifier;
pub mod error;
pub mod inventory;
pub mod parser;
pub mod registries;
pub mod registry;
pub mod resolver;
pub mod types;
