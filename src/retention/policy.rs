//! Retention policy: which tags of a repository survive a cleanup pass
//!
//! A tag is kept if any of these holds, checked in order:
//!
//! 1. it is deployed (in use)
//! 2. its digest is protected (part of an in-use manifest list, or shared
//!    with an in-use tag)
//! 3. it is the alias tag
//! 4. it is semantic
//! 5. its creation time is unresolved
//! 6. it is among the `keep_count` most recent remaining opaque tags
//!
//! Everything else is deletable.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::DEFAULT_ALIAS_TAG;
use crate::version::types::{RepositoryInventory, TagRecord};

/// Why a tag was kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Exemption {
    InUse,
    ProtectedDigest,
    Alias,
    Semantic,
    UnresolvedCreationTime,
}

/// A tag planned for deletion, with what the delete call and the audit log need
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletionCandidate {
    pub tag: String,
    pub provider_id: Option<String>,
    pub digest: Option<String>,
    pub created_at: DateTime<Utc>,
    pub age_days: i64,
}

impl DeletionCandidate {
    /// The record handed to the registry's delete call
    pub fn to_record(&self) -> TagRecord {
        let mut record = TagRecord::new(&self.tag).with_created_at(self.created_at);
        if let Some(id) = &self.provider_id {
            record = record.with_provider_id(id);
        }
        if let Some(digest) = &self.digest {
            record = record.with_digest(digest);
        }
        record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupCounts {
    pub in_use: usize,
    pub kept: usize,
    pub deletable: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPlan {
    pub repository: String,
    pub tags_in_use: BTreeSet<String>,
    pub tags_to_keep: BTreeSet<String>,
    pub tags_to_delete: BTreeSet<String>,
    /// Digests of in-use builds and their platform manifests
    pub protected_digests: BTreeSet<String>,
    /// Details of `tags_to_delete`, oldest first
    pub candidates: Vec<DeletionCandidate>,
}

impl CleanupPlan {
    pub fn counts(&self) -> CleanupCounts {
        CleanupCounts {
            in_use: self.tags_in_use.len(),
            kept: self.tags_to_keep.len(),
            deletable: self.tags_to_delete.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tags_to_delete.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_count: usize,
    pub alias_tag: String,
}

impl RetentionPolicy {
    pub fn new(keep_count: usize, alias_tag: impl Into<String>) -> Self {
        Self {
            keep_count,
            alias_tag: alias_tag.into(),
        }
    }

    /// The first exemption that applies to a tag, ignoring recency
    pub fn exemption(
        &self,
        record: &TagRecord,
        tags_in_use: &BTreeSet<String>,
        protected_digests: &BTreeSet<String>,
    ) -> Option<Exemption> {
        if tags_in_use.contains(&record.tag) {
            Some(Exemption::InUse)
        } else if record
            .digest
            .as_ref()
            .is_some_and(|d| protected_digests.contains(d))
        {
            Some(Exemption::ProtectedDigest)
        } else if record.tag == self.alias_tag {
            Some(Exemption::Alias)
        } else if record.version.is_semantic() {
            Some(Exemption::Semantic)
        } else if record.created_at.is_none() {
            Some(Exemption::UnresolvedCreationTime)
        } else {
            None
        }
    }

    /// Plans the cleanup of one repository. Ages are measured from the
    /// inventory's fetch time, which is the run's reference time.
    pub fn plan(
        &self,
        inventory: &RepositoryInventory,
        tags_in_use: &BTreeSet<String>,
        protected_digests: &BTreeSet<String>,
    ) -> CleanupPlan {
        let mut tags_to_keep = BTreeSet::new();
        let mut eligible: Vec<(&TagRecord, DateTime<Utc>)> = Vec::new();

        for record in &inventory.tags {
            match (
                self.exemption(record, tags_in_use, protected_digests),
                record.created_at,
            ) {
                (None, Some(created_at)) => eligible.push((record, created_at)),
                _ => {
                    tags_to_keep.insert(record.tag.clone());
                }
            }
        }

        // Most recent first; equal times fall back to the tag, descending.
        eligible.sort_by(|(a, ta), (b, tb)| tb.cmp(ta).then_with(|| b.tag.cmp(&a.tag)));

        let deletable = eligible.split_off(self.keep_count.min(eligible.len()));
        tags_to_keep.extend(eligible.iter().map(|(r, _)| r.tag.clone()));

        let candidates: Vec<DeletionCandidate> = deletable
            .into_iter()
            .rev()
            .map(|(record, created_at)| DeletionCandidate {
                tag: record.tag.clone(),
                provider_id: record.provider_id.clone(),
                digest: record.digest.clone(),
                created_at,
                age_days: (inventory.fetched_at - created_at).num_days(),
            })
            .collect();

        let plan = CleanupPlan {
            repository: inventory.repository.clone(),
            tags_in_use: tags_in_use.clone(),
            tags_to_keep,
            tags_to_delete: candidates.iter().map(|c| c.tag.clone()).collect(),
            protected_digests: protected_digests.clone(),
            candidates,
        };

        let counts = plan.counts();
        info!(
            "Cleanup plan for {}: {} in use, {} kept, {} deletable",
            plan.repository, counts.in_use, counts.kept, counts.deletable
        );
        plan
    }
}

/// Plans a cleanup with the default alias tag and no protected digests
pub fn compute_cleanup(
    inventory: &RepositoryInventory,
    tags_in_use: &BTreeSet<String>,
    keep_count: usize,
) -> CleanupPlan {
    RetentionPolicy::new(keep_count, DEFAULT_ALIAS_TAG).plan(
        inventory,
        tags_in_use,
        &BTreeSet::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn day(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(n)
    }

    fn at(tag: &str, n: i64) -> TagRecord {
        TagRecord::new(tag).with_created_at(day(n))
    }

    fn inventory(tags: Vec<TagRecord>) -> RepositoryInventory {
        RepositoryInventory::new("team/app", tags, day(100))
    }

    fn set(tags: &[&str]) -> BTreeSet<String> {
        tags.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn keeps_in_use_tag_plus_most_recent_eligible() {
        // Newest first: abc1 (in use), abc2, abc3, abc4.
        let inv = inventory(vec![
            at("abc1", 40),
            at("abc2", 30),
            at("abc3", 20),
            at("abc4", 10),
        ]);

        let plan = compute_cleanup(&inv, &set(&["abc1"]), 2);

        assert_eq!(plan.tags_to_keep, set(&["abc1", "abc2", "abc3"]));
        assert_eq!(plan.tags_to_delete, set(&["abc4"]));
        assert_eq!(plan.candidates[0].age_days, 90);
        assert_eq!(
            plan.counts(),
            CleanupCounts {
                in_use: 1,
                kept: 3,
                deletable: 1
            }
        );
    }

    #[test]
    fn never_deletes_alias_or_semantic_tags() {
        let inv = inventory(vec![
            at("latest", 1),
            at("1.0.0", 2),
            at("v2.0.0", 3),
            at("abc1", 4),
            at("abc2", 5),
        ]);

        let plan = compute_cleanup(&inv, &BTreeSet::new(), 1);

        assert_eq!(plan.tags_to_delete, set(&["abc1"]));
        assert!(plan.tags_to_keep.contains("latest"));
        assert!(plan.tags_to_keep.contains("1.0.0"));
    }

    #[test]
    fn two_part_release_tags_are_kept() {
        let inv = inventory(vec![at("16.2", 1), at("abc1", 2), at("abc2", 3)]);

        let plan = compute_cleanup(&inv, &BTreeSet::new(), 1);

        assert!(plan.tags_to_keep.contains("16.2"));
        assert_eq!(plan.tags_to_delete, set(&["abc1"]));
    }

    #[test]
    fn never_deletes_tags_with_unresolved_creation_time() {
        let inv = inventory(vec![
            at("abc1", 9),
            TagRecord::new("abc2"),
            at("abc3", 1),
        ]);

        let plan = compute_cleanup(&inv, &BTreeSet::new(), 1);

        assert_eq!(plan.tags_to_delete, set(&["abc3"]));
        assert!(plan.tags_to_keep.contains("abc2"));
    }

    #[test]
    fn equal_creation_times_keep_higher_tag() {
        let inv = inventory(vec![at("aaa", 5), at("bbb", 5)]);

        let plan = compute_cleanup(&inv, &BTreeSet::new(), 1);

        assert_eq!(plan.tags_to_keep, set(&["bbb"]));
        assert_eq!(plan.tags_to_delete, set(&["aaa"]));
    }

    #[test]
    fn protected_digests_are_kept() {
        let inv = inventory(vec![
            at("abc1", 9),
            at("abc2", 5).with_digest("sha256:child"),
            at("abc3", 1),
        ]);
        let policy = RetentionPolicy::new(1, "latest");

        let plan = policy.plan(&inv, &BTreeSet::new(), &set(&["sha256:child"]));

        assert_eq!(plan.tags_to_delete, set(&["abc3"]));
        assert_eq!(plan.protected_digests, set(&["sha256:child"]));
        assert_eq!(
            policy.exemption(
                inv.get("abc2").unwrap(),
                &BTreeSet::new(),
                &set(&["sha256:child"])
            ),
            Some(Exemption::ProtectedDigest)
        );
    }

    #[test]
    fn candidates_are_listed_oldest_first_with_provider_ids() {
        let inv = inventory(vec![
            at("abc1", 30).with_provider_id("ocid.1"),
            at("abc2", 20).with_provider_id("ocid.2"),
            at("abc3", 10).with_provider_id("ocid.3"),
        ]);

        let plan = compute_cleanup(&inv, &BTreeSet::new(), 1);

        let order: Vec<_> = plan.candidates.iter().map(|c| c.tag.as_str()).collect();
        assert_eq!(order, vec!["abc3", "abc2"]);
        assert_eq!(
            plan.candidates[0].to_record().provider_id.as_deref(),
            Some("ocid.3")
        );
    }

    #[test]
    fn custom_alias_tag_is_exempt() {
        let inv = inventory(vec![at("stable", 1), at("abc1", 5)]);

        let plan =
            RetentionPolicy::new(1, "stable").plan(&inv, &BTreeSet::new(), &BTreeSet::new());

        assert!(plan.is_empty());
    }

    #[test]
    fn identical_inventories_yield_identical_plans() {
        let tags = vec![at("abc1", 3), at("abc2", 2), at("abc3", 1), at("1.0.0", 0)];
        let in_use = set(&["abc2"]);

        assert_eq!(
            compute_cleanup(&inventory(tags.clone()), &in_use, 1),
            compute_cleanup(&inventory(tags), &in_use, 1)
        );
    }

    fn arb_record() -> impl Strategy<Value = TagRecord> {
        (
            prop_oneof![
                "[a-f0-9]{6,10}",
                (0u64..3, 0u64..5, 0u64..5).prop_map(|(a, b, c)| format!("{}.{}.{}", a, b, c)),
                Just("latest".to_string()),
            ],
            proptest::option::weighted(0.8, 0i64..60),
        )
            .prop_map(|(tag, created)| {
                let record = TagRecord::new(tag);
                match created {
                    Some(n) => record.with_created_at(day(n)),
                    None => record,
                }
            })
    }

    proptest! {
        #[test]
        fn plan_respects_exemptions(
            records in proptest::collection::vec(arb_record(), 0..30),
            in_use_picks in proptest::collection::vec(any::<prop::sample::Index>(), 0..5),
            keep_count in 1usize..6,
        ) {
            let inv = inventory(records);
            let in_use: BTreeSet<String> = if inv.tags.is_empty() {
                BTreeSet::new()
            } else {
                in_use_picks.iter().map(|i| i.get(&inv.tags).tag.clone()).collect()
            };

            let plan = compute_cleanup(&inv, &in_use, keep_count);

            prop_assert!(plan.tags_to_delete.is_disjoint(&plan.tags_in_use));
            prop_assert!(plan.tags_to_delete.is_disjoint(&plan.tags_to_keep));
            for tag in &plan.tags_to_delete {
                let record = inv.get(tag).unwrap();
                prop_assert!(record.version.is_opaque());
                prop_assert!(record.tag != "latest");
                prop_assert!(record.created_at.is_some());
            }

            let eligible = inv
                .tags
                .iter()
                .filter(|r| {
                    !in_use.contains(&r.tag)
                        && r.tag != "latest"
                        && r.version.is_opaque()
                        && r.created_at.is_some()
                })
                .count();
            let retained = eligible - plan.tags_to_delete.len();
            prop_assert_eq!(retained, keep_count.min(eligible));

            // Every kept eligible tag is at least as recent as every deleted one.
            let newest_deleted = plan.candidates.iter().map(|c| c.created_at).max();
            if let Some(newest_deleted) = newest_deleted {
                for record in inv.tags.iter().filter(|r| {
                    plan.tags_to_keep.contains(&r.tag)
                        && !in_use.contains(&r.tag)
                        && r.tag != "latest"
                        && r.version.is_opaque()
                }) {
                    if let Some(created) = record.created_at {
                        prop_assert!(created >= newest_deleted);
                    }
                }
            }
        }
    }
}
