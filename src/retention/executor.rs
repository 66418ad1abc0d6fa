//! Deletion pass over cleanup plans
//!
//! Deletions for a repository run one at a time, in plan order (oldest
//! first), so the audit trail reads in the order things happened. Every tag is
//! re-checked against the plan and the policy right before its delete call.
//! Failures are collected and the pass moves on.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::context::RunContext;
use crate::retention::policy::{CleanupPlan, DeletionCandidate, RetentionPolicy};
use crate::version::error::RegistryError;
use crate::version::parser::parse;
use crate::version::registry::Registry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedTag {
    pub repository: String,
    pub tag: String,
    pub age_days: i64,
    /// The registry no longer had the tag
    pub already_absent: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFailure {
    pub repository: String,
    pub tag: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionReport {
    pub deleted: Vec<DeletedTag>,
    pub failed: Vec<DeleteFailure>,
    /// Candidates blocked by the pre-delete safety check
    pub refused: Vec<DeleteFailure>,
}

impl DeletionReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.refused.is_empty()
    }
}

/// Hard safety check run immediately before a delete call
pub fn verify_deletable(
    plan: &CleanupPlan,
    candidate: &DeletionCandidate,
    policy: &RetentionPolicy,
) -> Result<(), String> {
    let tag = candidate.tag.as_str();
    if plan.tags_in_use.contains(tag) {
        return Err("tag is in use".to_string());
    }
    if candidate
        .digest
        .as_ref()
        .is_some_and(|d| plan.protected_digests.contains(d))
    {
        return Err("digest is used by a deployed build".to_string());
    }
    if tag == policy.alias_tag {
        return Err("tag is the alias tag".to_string());
    }
    if parse(tag).is_semantic() {
        return Err("tag is semantic".to_string());
    }
    if plan.tags_to_keep.contains(tag) {
        return Err("tag is marked to keep".to_string());
    }
    if !plan.tags_to_delete.contains(tag) {
        return Err("tag is not planned for deletion".to_string());
    }
    Ok(())
}

/// Deletes the planned tags of one repository, appending outcomes to `report`.
///
/// The adapter's cached state for the repository is dropped afterwards, even
/// if some deletions failed.
pub async fn execute_plan(
    registry: &dyn Registry,
    plan: &CleanupPlan,
    policy: &RetentionPolicy,
    ctx: &RunContext,
    report: &mut DeletionReport,
) {
    let host = registry.host();
    let repository = plan.repository.as_str();

    for candidate in &plan.candidates {
        if let Err(reason) = verify_deletable(plan, candidate, policy) {
            warn!(
                "Refusing to delete {}/{}:{}: {}",
                host, repository, candidate.tag, reason
            );
            report.refused.push(DeleteFailure {
                repository: repository.to_string(),
                tag: candidate.tag.clone(),
                error: reason,
            });
            continue;
        }

        if ctx.is_cancelled() {
            report.failed.push(DeleteFailure {
                repository: repository.to_string(),
                tag: candidate.tag.clone(),
                error: RegistryError::Cancelled.to_string(),
            });
            continue;
        }

        let record = candidate.to_record();
        match ctx
            .call(&host, registry.delete_tag(repository, &record))
            .await
        {
            Ok(()) => {
                info!(
                    "Deleted {}/{}:{} ({} days old)",
                    host, repository, candidate.tag, candidate.age_days
                );
                report.deleted.push(DeletedTag {
                    repository: repository.to_string(),
                    tag: candidate.tag.clone(),
                    age_days: candidate.age_days,
                    already_absent: false,
                });
            }
            Err(e) if e.is_not_found() => {
                info!(
                    "{}/{}:{} was already deleted",
                    host, repository, candidate.tag
                );
                report.deleted.push(DeletedTag {
                    repository: repository.to_string(),
                    tag: candidate.tag.clone(),
                    age_days: candidate.age_days,
                    already_absent: true,
                });
            }
            Err(e) => {
                error!(
                    "Failed to delete {}/{}:{}: {}",
                    host, repository, candidate.tag, e
                );
                report.failed.push(DeleteFailure {
                    repository: repository.to_string(),
                    tag: candidate.tag.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    registry.invalidate(repository);
}
