//! Tag records and repository inventories

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::version::parser::{ParsedVersion, parse};

/// One tag in a repository, with whatever metadata the registry provided
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagRecord {
    pub tag: String,
    pub version: ParsedVersion,
    /// Creation time of the build, always normalized to UTC at ingestion
    pub created_at: Option<DateTime<Utc>>,
    pub digest: Option<String>,
    /// Provider-specific identifier used for deletion (e.g. an OCIR image OCID)
    pub provider_id: Option<String>,
}

impl TagRecord {
    pub fn new(tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            version: parse(&tag),
            tag,
            created_at: None,
            digest: None,
            provider_id: None,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }
}

/// All tags of one repository as seen at `fetched_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryInventory {
    pub repository: String,
    pub tags: Vec<TagRecord>,
    pub fetched_at: DateTime<Utc>,
}

impl RepositoryInventory {
    /// Build an inventory, keeping the first record for any duplicated tag.
    pub fn new(
        repository: impl Into<String>,
        records: Vec<TagRecord>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        let mut seen = HashSet::new();
        let tags = records
            .into_iter()
            .filter(|r| seen.insert(r.tag.clone()))
            .collect();
        Self {
            repository: repository.into(),
            tags,
            fetched_at,
        }
    }

    pub fn get(&self, tag: &str) -> Option<&TagRecord> {
        self.tags.iter().find(|r| r.tag == tag)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Records other than the mutable alias tag
    pub fn comparable<'a>(&'a self, alias_tag: &'a str) -> impl Iterator<Item = &'a TagRecord> {
        self.tags.iter().filter(move |r| r.tag != alias_tag)
    }

    /// Whether any comparable tag is opaque. Opaque tags can only be ordered by
    /// creation time, so such repositories need every timestamp resolved.
    pub fn needs_timestamps(&self, alias_tag: &str) -> bool {
        self.comparable(alias_tag).any(|r| r.version.is_opaque())
    }
}
