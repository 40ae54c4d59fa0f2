use crate::catalog::{CatalogClient, CatalogError, TaxonIndex};
use crate::config::Environment;
use crate::diff::{ChangeCounts, compare};
use crate::fingerprint::fingerprint_all;
use crate::images::ImageLocator;
use crate::metrics;
use crate::models::{CategorySnapshot, FingerprintMap, StockRecords};
use crate::notify::Notifier;
use crate::reconcile::{ActionCounts, CategoryCounts, ProductFilter, ReconcileOptions, Reconciler};
use crate::snapshot::{SnapshotError, SnapshotKind, SnapshotStore};
use crate::source::{InventorySource, SourceError, fetch_inventory};
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Instant,
};
use thiserror::Error;
use tracing::info;

/// Failures that end a run before or between reconciliation phases.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("inventory unavailable: {0}")]
    Source(#[from] SourceError),
    #[error("snapshot store failed: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error("could not list catalog taxonomies: {0}")]
    Catalog(#[from] CatalogError),
}

/// Collaborators for one run, built once by the caller.
pub struct SyncContext<'a> {
    pub environment: Environment,
    pub store: &'a SnapshotStore,
    pub catalog: Arc<dyn CatalogClient>,
    pub images: &'a dyn ImageLocator,
    pub filter: &'a ProductFilter,
    pub notifier: &'a dyn Notifier,
    pub options: ReconcileOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub departments: ChangeCounts,
    pub categories: ChangeCounts,
    pub stock: ChangeCounts,
    pub category_actions: CategoryCounts,
    pub actions: ActionCounts,
    pub unsettled: usize,
    pub notified: bool,
    pub elapsed_ms: u64,
}

/// Removes every snapshot so the next run treats all records as new.
pub fn bootstrap(store: &SnapshotStore) -> Result<(), SnapshotError> {
    store.clear()?;
    info!(target = "catalog_sync.sync", "snapshots_cleared");
    Ok(())
}

/// One full pass: read the inventory, diff it against the last snapshot,
/// push the differences to the catalog, then persist what was applied.
pub async fn run_sync(
    ctx: SyncContext<'_>,
    source: &mut dyn InventorySource,
) -> Result<RunSummary, SyncError> {
    let started = Instant::now();

    let inventory = fetch_inventory(source).await?;
    let previous_categories: CategorySnapshot =
        ctx.store.load_or_default(SnapshotKind::Categories)?;
    let previous_stock: StockRecords = ctx.store.load_or_default(SnapshotKind::StockRecords)?;
    let previous_fingerprints: FingerprintMap =
        ctx.store.load_or_default(SnapshotKind::Fingerprints)?;

    let current_fingerprints = fingerprint_all(&inventory.stock);
    let department_changes = compare(&inventory.departments, &previous_categories.departments);
    let category_changes = compare(&inventory.categories, &previous_categories.categories);
    let stock_changes = compare(&current_fingerprints, &previous_fingerprints);
    info!(
        target = "catalog_sync.sync",
        environment = %ctx.environment,
        records = inventory.stock.len(),
        departments_changed = department_changes.counts.total(),
        categories_changed = category_changes.counts.total(),
        stock_new = stock_changes.counts.new,
        stock_updated = stock_changes.counts.update,
        stock_deleted = stock_changes.counts.delete,
        "changes_detected"
    );
    metrics::stage_elapsed("detect", started.elapsed().as_millis());

    let index = TaxonIndex::load(ctx.catalog.as_ref()).await?;
    let mut reconciler = Reconciler::new(
        ctx.catalog.clone(),
        ctx.images,
        ctx.filter,
        ctx.options,
        index,
    );

    let category_stage = Instant::now();
    let failed_departments = reconciler
        .apply_departments(
            &department_changes,
            &previous_categories.departments,
            &inventory.departments,
        )
        .await;
    let failed_categories = reconciler
        .apply_categories(
            &category_changes,
            &previous_categories.categories,
            &inventory.categories,
            &inventory.associations,
        )
        .await;
    let applied_categories = CategorySnapshot {
        departments: write_back(
            &inventory.departments,
            &previous_categories.departments,
            &failed_departments,
        ),
        categories: write_back(
            &inventory.categories,
            &previous_categories.categories,
            &failed_categories,
        ),
    };
    ctx.store.save(SnapshotKind::Categories, &applied_categories)?;
    metrics::stage_elapsed("categories", category_stage.elapsed().as_millis());

    let stock_stage = Instant::now();
    let unsettled_stock = reconciler
        .apply_stock(
            &stock_changes,
            &previous_stock,
            &inventory.stock,
            &inventory.stock_categories,
        )
        .await;
    ctx.store.save(
        SnapshotKind::Fingerprints,
        &write_back(&current_fingerprints, &previous_fingerprints, &unsettled_stock),
    )?;
    ctx.store.save(
        SnapshotKind::StockRecords,
        &write_back(&inventory.stock, &previous_stock, &unsettled_stock),
    )?;
    metrics::stage_elapsed("stock", stock_stage.elapsed().as_millis());

    let report = reconciler.finish();
    let notified = report.sink.dispatch(ctx.notifier, ctx.environment).await;
    let summary = RunSummary {
        departments: department_changes.counts,
        categories: category_changes.counts,
        stock: stock_changes.counts,
        category_actions: report.categories,
        actions: report.stock,
        unsettled: failed_departments.len() + failed_categories.len() + unsettled_stock.len(),
        notified,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    log_summary(&summary);
    Ok(summary)
}

/// State to persist: `current`, except that keys in `unsettled` keep their
/// `previous` value, or are left out when they had none.
pub fn write_back<K, V>(
    current: &BTreeMap<K, V>,
    previous: &BTreeMap<K, V>,
    unsettled: &BTreeSet<K>,
) -> BTreeMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    let mut applied = current.clone();
    for key in unsettled {
        match previous.get(key) {
            Some(value) => applied.insert(key.clone(), value.clone()),
            None => applied.remove(key),
        };
    }
    applied
}

fn log_summary(summary: &RunSummary) {
    let actions = &summary.actions;
    let categories = &summary.category_actions;
    info!(
        target = "catalog_sync.sync",
        elapsed_ms = summary.elapsed_ms,
        new = actions.new,
        update = actions.update,
        delete = actions.delete,
        image = actions.image,
        image_error = actions.image_error,
        ignore = actions.ignore,
        ignored_weight = actions.ignored_weight,
        ignored_no_image = actions.ignored_no_image,
        ignored_not_valid = actions.ignored_not_valid,
        error = actions.error,
        categories_created = categories.created,
        categories_flagged = categories.flagged,
        categories_skipped = categories.skipped,
        categories_error = categories.error,
        unsettled = summary.unsettled,
        notified = summary.notified,
        "sync_finished"
    );
}
