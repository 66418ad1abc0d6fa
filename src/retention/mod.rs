//! Tag retention: cleanup planning and the deletion pass

pub mod executor;
pub mod policy;

pub use executor::{DeleteFailure, DeletedTag, DeletionReport, execute_plan, verify_deletable};
pub use policy::{CleanupPlan, DeletionCandidate, RetentionPolicy, compute_cleanup};
