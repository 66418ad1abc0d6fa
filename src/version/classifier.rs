//! Update classification for a deployed tag against the resolved latest tag

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::version::types::TagRecord;

/// Opaque tags longer than this are shortened in version diffs
const SHORT_TAG_LEN: usize = 12;

/// Magnitude of an available update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateType {
    Major,
    Minor,
    Patch,
    /// A newer opaque build exists
    Commit,
    /// Already on the latest build
    None,
    /// Could not be determined (missing timestamps, registry failure, cancelled)
    Unknown,
}

impl UpdateType {
    pub fn is_update(&self) -> bool {
        matches!(
            self,
            UpdateType::Major | UpdateType::Minor | UpdateType::Patch | UpdateType::Commit
        )
    }
}

/// Outcome of checking one deployed image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub image: String,
    pub current_tag: String,
    pub latest_tag: Option<String>,
    pub update_type: UpdateType,
    pub age_days: Option<i64>,
    pub version_diff: Option<String>,
    pub alternate_tag: Option<String>,
    /// Why the check could not be completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl UpdateResult {
    /// A result for an image whose check could not run
    pub fn skipped(
        image: impl Into<String>,
        current_tag: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            image: image.into(),
            current_tag: current_tag.into(),
            latest_tag: None,
            update_type: UpdateType::Unknown,
            age_days: None,
            version_diff: None,
            alternate_tag: None,
            skipped: Some(reason.into()),
        }
    }
}

/// Classify the update from `current` to `latest`.
///
/// Two semantic tags compare by value. As soon as either side is opaque the
/// comparison is by creation time, and an unresolved time on either side makes
/// the result `Unknown`.
pub fn classify(current: &TagRecord, latest: &TagRecord) -> UpdateType {
    if let (Some(cur), Some(lat)) = (current.version.as_semantic(), latest.version.as_semantic()) {
        return if lat <= cur {
            UpdateType::None
        } else if lat.major > cur.major {
            UpdateType::Major
        } else if lat.minor > cur.minor {
            UpdateType::Minor
        } else {
            UpdateType::Patch
        };
    }

    if current.tag == latest.tag {
        return UpdateType::None;
    }

    match (current.created_at, latest.created_at) {
        (Some(cur), Some(lat)) if lat > cur => UpdateType::Commit,
        (Some(_), Some(_)) => UpdateType::None,
        _ => UpdateType::Unknown,
    }
}

/// How many days newer `latest` is than `current`, measured as the
/// difference of their ages at `now`
pub fn age_days(current: &TagRecord, latest: &TagRecord, now: DateTime<Utc>) -> Option<i64> {
    let current_age = (now - current.created_at?).num_days();
    let latest_age = (now - latest.created_at?).num_days();
    Some((current_age - latest_age).max(0))
}

fn short(tag: &str) -> &str {
    match tag.char_indices().nth(SHORT_TAG_LEN) {
        Some((idx, _)) => &tag[..idx],
        None => tag,
    }
}

/// Short human-readable summary such as `1.0.0 → 1.2.0` or
/// `abc111 → def222 (+5d)`
pub fn version_diff(current: &TagRecord, latest: &TagRecord, age_days: Option<i64>) -> String {
    if current.version.is_semantic() && latest.version.is_semantic() {
        return format!("{} → {}", current.tag, latest.tag);
    }
    let diff = format!("{} → {}", short(&current.tag), short(&latest.tag));
    match age_days {
        Some(days) => format!("{} (+{}d)", diff, days),
        None => diff,
    }
}
