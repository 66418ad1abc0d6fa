//! Run-scoped repository inventories
//!
//! An inventory is built at most once per repository per run. Concurrent
//! requesters for the same repository share the first in-flight fetch, and its
//! outcome (including a failure) is what every later requester sees until the
//! entry is invalidated.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::context::RunContext;
use crate::version::error::RegistryError;
use crate::version::registry::Registry;
use crate::version::types::RepositoryInventory;

/// Creation-time lookups started concurrently for one repository.
/// The host limiter still bounds what actually reaches the registry.
const TIMESTAMP_FANOUT: usize = 16;

pub type InventoryResult = Result<Arc<RepositoryInventory>, RegistryError>;

#[derive(Debug, Default)]
pub struct InventoryCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<InventoryResult>>>>,
}

impl InventoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, key: &str) -> Arc<OnceCell<InventoryResult>> {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        entries.entry(key.to_string()).or_default().clone()
    }

    /// Returns the cached inventory for `key`, running `fetch` only if no
    /// fetch for it has started yet.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> InventoryResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RepositoryInventory, RegistryError>>,
    {
        let cell = self.cell(key);
        cell.get_or_init(move || async move { fetch().await.map(Arc::new) })
            .await
            .clone()
    }

    pub fn invalidate(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if entries.remove(key).is_some() {
            debug!("Invalidated inventory for {}", key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lists a repository and resolves the creation times ordering depends on.
///
/// Semantic-only repositories are ordered by value, so no per-tag lookups are
/// made for them. As soon as an opaque tag is present every comparable tag
/// needs a timestamp. A tag whose manifest has disappeared keeps an unresolved
/// timestamp; any other lookup failure fails the whole inventory.
pub async fn build_inventory(
    registry: &dyn Registry,
    repository: &str,
    alias_tag: &str,
    ctx: &RunContext,
) -> Result<RepositoryInventory, RegistryError> {
    let host = registry.host();
    let records = ctx.call(&host, registry.list_tags(repository)).await?;
    let mut inventory = RepositoryInventory::new(repository, records, ctx.now());

    info!(
        "Listed {} tags for {}/{}",
        inventory.tags.len(),
        host,
        repository
    );

    if !inventory.needs_timestamps(alias_tag) {
        debug!(
            "{}/{} has only semantic tags, skipping creation time lookups",
            host, repository
        );
        return Ok(inventory);
    }

    let missing: Vec<String> = inventory
        .comparable(alias_tag)
        .filter(|r| r.created_at.is_none())
        .map(|r| r.tag.clone())
        .collect();

    if missing.is_empty() {
        return Ok(inventory);
    }

    debug!(
        "Resolving creation time for {} tags of {}/{}",
        missing.len(),
        host,
        repository
    );

    let host_ref = host.as_str();
    let resolved: Vec<(String, Result<DateTime<Utc>, RegistryError>)> = stream::iter(missing)
        .map(move |tag| async move {
            let result = ctx
                .call(host_ref, registry.get_creation_time(repository, &tag))
                .await;
            (tag, result)
        })
        .buffer_unordered(TIMESTAMP_FANOUT)
        .collect()
        .await;

    for (tag, result) in resolved {
        match result {
            Ok(created_at) => {
                if let Some(record) = inventory.tags.iter_mut().find(|r| r.tag == tag) {
                    record.created_at = Some(created_at);
                }
            }
            Err(e) if e.is_not_found() => {
                warn!(
                    "No manifest for {}/{}:{}, leaving creation time unresolved",
                    host, repository, tag
                );
            }
            Err(e) => return Err(e),
        }
    }

    Ok(inventory)
}
