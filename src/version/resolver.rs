//! Latest tag resolution across semantic and opaque tag spaces
//!
//! ```text
//!   comparable tags (alias excluded)
//!            │
//!            ├── only semantic ──▶ max (major, minor, patch), then raw tag
//!            ├── only opaque ────▶ max created_at, then tag
//!            └── mixed ──────────▶ max created_at over every tag, then tag
//! ```
//!
//! Semantic and opaque tags cannot be ordered against each other by value: a
//! commit build may postdate an older release. Mixed repositories are
//! therefore always ordered by creation time.

use std::cmp::Ordering;

use serde::Serialize;

use crate::version::parser::parse;
use crate::version::types::{RepositoryInventory, TagRecord};

/// The resolved latest tag of a repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatestTag {
    pub latest: TagRecord,
    /// Same build as `latest` (identical creation time) but in the current
    /// tag's tag space, when `latest` is in the other one
    pub alternate: Option<TagRecord>,
}

fn by_recency(a: &TagRecord, b: &TagRecord) -> Ordering {
    a.created_at.cmp(&b.created_at).then_with(|| a.tag.cmp(&b.tag))
}

fn by_version(a: &TagRecord, b: &TagRecord) -> Ordering {
    match (a.version.as_semantic(), b.version.as_semantic()) {
        (Some(va), Some(vb)) => va.cmp(vb).then_with(|| va.raw.cmp(&vb.raw)),
        _ => a.tag.cmp(&b.tag),
    }
}

/// Resolve the latest tag of `inventory` relative to the deployed `current_tag`.
///
/// Returns `None` when nothing can be ordered: no comparable tags, or only
/// tags whose creation time is unresolved where recency decides.
pub fn get_latest(
    inventory: &RepositoryInventory,
    current_tag: &str,
    alias_tag: &str,
) -> Option<LatestTag> {
    let (semantic, opaque): (Vec<&TagRecord>, Vec<&TagRecord>) = inventory
        .comparable(alias_tag)
        .partition(|r| r.version.is_semantic());

    let latest = if opaque.is_empty() {
        semantic.into_iter().max_by(|a, b| by_version(a, b))?
    } else {
        // Opaque-only and mixed repositories are both ordered by recency; in
        // the mixed case every tag competes.
        semantic
            .into_iter()
            .chain(opaque)
            .filter(|r| r.created_at.is_some())
            .max_by(|a, b| by_recency(a, b))?
    };

    Some(LatestTag {
        alternate: find_alternate(inventory, latest, current_tag, alias_tag),
        latest: latest.clone(),
    })
}

/// Another tag of the same build as `latest` in the current tag's tag space
fn find_alternate(
    inventory: &RepositoryInventory,
    latest: &TagRecord,
    current_tag: &str,
    alias_tag: &str,
) -> Option<TagRecord> {
    let current = inventory
        .get(current_tag)
        .map(|r| r.version.clone())
        .unwrap_or_else(|| parse(current_tag));

    if latest.version.same_kind(&current) {
        return None;
    }
    let created_at = latest.created_at?;

    inventory
        .comparable(alias_tag)
        .filter(|r| r.created_at == Some(created_at) && r.version.same_kind(&current))
        .max_by(|a, b| a.tag.cmp(&b.tag))
        .cloned()
}
