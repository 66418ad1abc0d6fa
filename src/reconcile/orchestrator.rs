//! One reconciliation pass
//!
//! ```text
//!   images ──dedupe──▶ check (worker pool) ──▶ updates
//!                            │
//!                     inventory cache (single-flight per repository)
//!                            │
//!   in-use tags + extra repositories ──▶ plan cleanup ──▶ cleanup plans
//!                                                            │
//!                                        cleanupEnabled ──▶ delete (sequential)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use futures::stream::{self, StreamExt};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::context::RunContext;
use crate::image::ImageReference;
use crate::reconcile::adapters::RegistrySet;
use crate::retention::{CleanupPlan, DeletionReport, RetentionPolicy, execute_plan};
use crate::version::classifier::{UpdateResult, UpdateType, age_days, classify, version_diff};
use crate::version::error::RegistryError;
use crate::version::inventory::{InventoryCache, InventoryResult, build_inventory};
use crate::version::registry::Registry;
use crate::version::resolver::get_latest;
use crate::version::types::TagRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRepository {
    pub repository: String,
    pub reason: String,
}

/// Structured outcome of a run, for whatever renders reports or notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub updates: Vec<UpdateResult>,
    /// Cleanup plans keyed by `registry/repository`
    pub cleanup: IndexMap<String, CleanupPlan>,
    pub skipped_repositories: Vec<SkippedRepository>,
    /// Present only when deletion was enabled
    pub deletions: Option<DeletionReport>,
}

pub struct Reconciler {
    registries: RegistrySet,
    config: RunConfig,
    policy: RetentionPolicy,
    cache: InventoryCache,
}

fn log_registry_error(repository: &str, e: &RegistryError) {
    match e {
        RegistryError::Cancelled => info!("Skipping {}: run cancelled", repository),
        e if e.is_auth() => warn!("Skipping {}: registry refused access: {}", repository, e),
        _ => warn!("Skipping {}: {}", repository, e),
    }
}

impl Reconciler {
    pub fn new(config: RunConfig, registries: RegistrySet) -> Self {
        Self {
            policy: RetentionPolicy::new(config.keep_count, config.alias_tag.clone()),
            registries,
            config,
            cache: InventoryCache::new(),
        }
    }

    pub fn cache(&self) -> &InventoryCache {
        &self.cache
    }

    async fn inventory(
        &self,
        registry: &dyn Registry,
        host: &str,
        repository: &str,
        ctx: &RunContext,
    ) -> InventoryResult {
        let key = format!("{}/{}", host, repository);
        self.cache
            .get_or_fetch(&key, || {
                build_inventory(registry, repository, &self.config.alias_tag, ctx)
            })
            .await
    }

    /// Checks one deployed image for a newer build. Never fails: problems
    /// come back as `UNKNOWN` with a skip reason.
    pub async fn check_image(&self, image: &ImageReference, ctx: &RunContext) -> UpdateResult {
        let image_name = image.to_string();

        if image.tag == self.config.alias_tag {
            debug!("Skipping version check for {} (alias tag)", image_name);
            return UpdateResult::skipped(
                image_name,
                &image.tag,
                format!("deployed by alias tag {}", image.tag),
            );
        }

        let registry = self.registries.get(&image.registry);
        let inventory = match self
            .inventory(registry.as_ref(), &image.registry, &image.repository, ctx)
            .await
        {
            Ok(inventory) => inventory,
            Err(e) => {
                log_registry_error(&image.repository_key(), &e);
                return UpdateResult::skipped(image_name, &image.tag, e.to_string());
            }
        };

        if inventory.is_empty() {
            warn!("No tags found for {}, skipping", image.repository_key());
            return UpdateResult::skipped(image_name, &image.tag, "no tags found in registry");
        }

        let current = inventory
            .get(&image.tag)
            .cloned()
            .unwrap_or_else(|| TagRecord::new(&image.tag));

        let Some(resolved) = get_latest(&inventory, &image.tag, &self.config.alias_tag) else {
            debug!("No comparable tags for {}", image_name);
            return UpdateResult {
                image: image_name,
                current_tag: image.tag.clone(),
                latest_tag: None,
                update_type: UpdateType::Unknown,
                age_days: None,
                version_diff: None,
                alternate_tag: None,
                skipped: None,
            };
        };

        let update_type = classify(&current, &resolved.latest);
        let age = age_days(&current, &resolved.latest, ctx.now());
        let diff = update_type
            .is_update()
            .then(|| version_diff(&current, &resolved.latest, age));

        if update_type.is_update() {
            info!(
                "{} has a newer build: {} ({:?})",
                image_name, resolved.latest.tag, update_type
            );
        }

        UpdateResult {
            image: image_name,
            current_tag: image.tag.clone(),
            latest_tag: Some(resolved.latest.tag.clone()),
            update_type,
            age_days: age,
            version_diff: diff,
            alternate_tag: resolved.alternate.map(|r| r.tag),
            skipped: None,
        }
    }

    /// `(host, repository)` for an `extraRepositories` entry
    fn resolve_extra(&self, entry: &str) -> Option<(String, String)> {
        match entry.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                Some((first.to_string(), rest.to_string()))
            }
            _ => self
                .registries
                .ocir_host()
                .map(|host| (host.to_string(), entry.to_string())),
        }
    }

    async fn plan_repository(
        &self,
        host: &str,
        repository: &str,
        tags_in_use: &BTreeSet<String>,
        ctx: &RunContext,
    ) -> Result<CleanupPlan, RegistryError> {
        let registry = self.registries.get(host);
        let inventory = self
            .inventory(registry.as_ref(), host, repository, ctx)
            .await?;

        let mut protected = BTreeSet::new();
        for tag in tags_in_use {
            let Some(record) = inventory.get(tag) else {
                continue;
            };
            if let Some(digest) = &record.digest {
                protected.insert(digest.clone());
            }
            match ctx
                .call(host, registry.manifest_children(repository, tag))
                .await
            {
                Ok(children) => protected.extend(children),
                Err(e) => warn!(
                    "Could not read manifest list of {}/{}:{}, assuming no children: {}",
                    host, repository, tag, e
                ),
            }
        }

        Ok(self.policy.plan(&inventory, tags_in_use, &protected))
    }

    /// Plans cleanup for every cleanup-eligible repository that is deployed or
    /// listed in `extraRepositories`.
    pub async fn plan_cleanup(
        &self,
        images: &[ImageReference],
        ctx: &RunContext,
    ) -> (IndexMap<String, CleanupPlan>, Vec<SkippedRepository>) {
        let mut targets: BTreeMap<(String, String), BTreeSet<String>> = BTreeMap::new();
        for image in images {
            targets
                .entry((image.registry.clone(), image.repository.clone()))
                .or_default()
                .insert(image.tag.clone());
        }
        let mut skipped = Vec::new();
        for entry in &self.config.extra_repositories {
            match self.resolve_extra(entry) {
                Some(target) => {
                    targets.entry(target).or_default();
                }
                None => {
                    warn!("Cannot resolve extra repository {}: no OCIR registry configured", entry);
                    skipped.push(SkippedRepository {
                        repository: entry.clone(),
                        reason: "no registry host and no OCIR registry configured".to_string(),
                    });
                }
            }
        }
        targets.retain(|(host, _), _| self.registries.cleanup_enabled(host));

        let results: Vec<(String, Result<CleanupPlan, RegistryError>)> = stream::iter(&targets)
            .map(move |((host, repository), in_use)| async move {
                let key = format!("{}/{}", host, repository);
                let plan = self.plan_repository(host, repository, in_use, ctx).await;
                (key, plan)
            })
            .buffered(self.config.workers)
            .collect()
            .await;

        let mut plans = IndexMap::new();
        for (key, result) in results {
            match result {
                Ok(plan) => {
                    plans.insert(key, plan);
                }
                Err(e) => {
                    log_registry_error(&key, &e);
                    skipped.push(SkippedRepository {
                        repository: key,
                        reason: e.to_string(),
                    });
                }
            }
        }
        (plans, skipped)
    }

    /// Executes cleanup plans one repository at a time
    pub async fn delete(
        &self,
        plans: &IndexMap<String, CleanupPlan>,
        ctx: &RunContext,
    ) -> DeletionReport {
        let mut report = DeletionReport::default();

        for (key, plan) in plans {
            if plan.is_empty() {
                continue;
            }
            let Some((host, _)) = key.split_once('/') else {
                continue;
            };
            let registry = self.registries.get(host);
            execute_plan(registry.as_ref(), plan, &self.policy, ctx, &mut report).await;
            self.cache.invalidate(key);
        }

        info!(
            "Deletion pass finished: {} deleted, {} failed, {} refused",
            report.deleted.len(),
            report.failed.len(),
            report.refused.len()
        );
        report
    }

    /// Runs a full pass: check every image, plan cleanup, and delete when
    /// `cleanupEnabled` is set.
    pub async fn run(&self, images: &[ImageReference], ctx: &RunContext) -> ReconcileReport {
        let images: Vec<ImageReference> = images
            .iter()
            .cloned()
            .collect::<IndexSet<_>>()
            .into_iter()
            .collect();
        info!("Checking {} images", images.len());

        let updates: Vec<UpdateResult> = stream::iter(&images)
            .map(move |image| self.check_image(image, ctx))
            .buffered(self.config.workers)
            .collect()
            .await;
        log_summary(&updates);

        let (cleanup, skipped_repositories) = self.plan_cleanup(&images, ctx).await;

        let deletions = if self.config.cleanup_enabled {
            Some(self.delete(&cleanup, ctx).await)
        } else {
            debug!("Cleanup disabled, {} plans computed only", cleanup.len());
            None
        };

        ReconcileReport {
            updates,
            cleanup,
            skipped_repositories,
            deletions,
        }
    }
}

fn log_summary(updates: &[UpdateResult]) {
    let count = |t: UpdateType| updates.iter().filter(|u| u.update_type == t).count();
    info!(
        "Version check completed: {} images, {} major, {} minor, {} patch, {} commit, {} unknown",
        updates.len(),
        count(UpdateType::Major),
        count(UpdateType::Minor),
        count(UpdateType::Patch),
        count(UpdateType::Commit),
        count(UpdateType::Unknown)
    );
}
