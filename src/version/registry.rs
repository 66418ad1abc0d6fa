//! Registry trait implemented by every provider adapter

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

use crate::version::error::RegistryError;
use crate::version::types::TagRecord;

/// Which family of registry API an adapter speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    /// Oracle Cloud Infrastructure Registry artifacts API (bulk listing)
    Ocir,
    /// OCI Distribution Specification v2 (Docker Hub, GHCR, Quay, self-hosted)
    Distribution,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ocir => "ocir",
            Provider::Distribution => "distribution",
        }
    }
}

/// Tag inventory, metadata and deletion for one registry host.
///
/// Repository names are always given in display form (as they appear in image
/// references); adapters translate to whatever the provider API expects.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Registry: Send + Sync {
    fn provider(&self) -> Provider;

    /// Host this adapter serves, used to key the per-host connection limit
    fn host(&self) -> String;

    /// Lists every tag of a repository.
    ///
    /// Creation times may be filled eagerly (bulk APIs) or left empty for
    /// [`Registry::get_creation_time`]. A repository that does not exist is an
    /// empty list, not an error.
    async fn list_tags(&self, repository: &str) -> Result<Vec<TagRecord>, RegistryError>;

    /// Creation time of the build a tag points at
    async fn get_creation_time(
        &self,
        repository: &str,
        tag: &str,
    ) -> Result<DateTime<Utc>, RegistryError>;

    /// Deletes a tag. `NotFound` means it was already gone.
    async fn delete_tag(&self, repository: &str, record: &TagRecord) -> Result<(), RegistryError>;

    /// Digests of the platform manifests referenced by `reference` when it is
    /// a multi-arch index; empty for single-platform manifests.
    async fn manifest_children(
        &self,
        repository: &str,
        reference: &str,
    ) -> Result<BTreeSet<String>, RegistryError>;

    /// Drops any provider-side cache held for a repository
    fn invalidate(&self, repository: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names() {
        assert_eq!(Provider::Ocir.as_str(), "ocir");
        assert_eq!(Provider::Distribution.as_str(), "distribution");
    }
}
