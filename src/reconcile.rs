use crate::catalog::{
    CatalogClient, CatalogError, NewProduct, NewTaxon, NewTaxonomy, ProductHandle, ProductUpdate,
    TaxonIndex, products::DeletionMarker,
};
use crate::diff::{Change, ChangeSet};
use crate::eligibility::{self, Action};
use crate::images::ImageLocator;
use crate::metrics;
use crate::models::{
    CategoryAssociation, NameMap, RecordId, StockRecord, StockRecords, UNASSIGNED_CATEGORY,
    capitalize,
};
use crate::notify::{DELETED_STATE, ErrorSink, FailureKind};
use crate::uploads::{UploadJob, UploadPool};
use chrono::Utc;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, error, info, warn};

/// Barcodes cleared for the web store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProductFilter {
    #[default]
    All,
    Only(HashSet<String>),
}

impl ProductFilter {
    /// Reads a YAML list of barcodes. A missing or unreadable file admits
    /// every product.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return ProductFilter::All;
        };
        let parsed = std::fs::read_to_string(path)
            .map_err(|err| err.to_string())
            .and_then(|raw| {
                serde_yaml::from_str::<Vec<String>>(&raw).map_err(|err| err.to_string())
            });
        match parsed {
            Ok(barcodes) => {
                info!(
                    target = "catalog_sync.reconcile",
                    path = %path.display(),
                    count = barcodes.len(),
                    "valid_products_loaded"
                );
                Self::from_barcodes(barcodes)
            }
            Err(err) => {
                warn!(
                    target = "catalog_sync.reconcile",
                    path = %path.display(),
                    error = %err,
                    "valid_products_unavailable_treating_all_as_valid"
                );
                ProductFilter::All
            }
        }
    }

    pub fn from_barcodes<I, S>(barcodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        ProductFilter::Only(
            barcodes
                .into_iter()
                .map(|barcode| barcode.as_ref().trim().to_uppercase())
                .collect(),
        )
    }

    pub fn allows(&self, barcode: &str) -> bool {
        match self {
            ProductFilter::All => true,
            ProductFilter::Only(barcodes) => barcodes.contains(&barcode.trim().to_uppercase()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    pub only_with_images: bool,
    pub upload_workers: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            only_with_images: false,
            upload_workers: 4,
        }
    }
}

/// Outcome tallies for stock records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionCounts {
    pub new: usize,
    pub update: usize,
    pub delete: usize,
    pub image: usize,
    pub image_error: usize,
    pub ignore: usize,
    pub ignored_weight: usize,
    pub ignored_no_image: usize,
    pub ignored_not_valid: usize,
    pub error: usize,
}

/// Outcome tallies for departments and categories.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub created: usize,
    pub flagged: usize,
    pub skipped: usize,
    pub error: usize,
}

/// What the reconciler did over one run.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub stock: ActionCounts,
    pub categories: CategoryCounts,
    pub sink: ErrorSink,
}

/// A record whose create was held back by a filter.
enum Held {
    NotValid,
    NoImage,
    Weight,
}

struct RecordError {
    kind: FailureKind,
    detail: String,
}

impl RecordError {
    fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    fn catalog(kind: FailureKind, err: CatalogError) -> Self {
        Self::new(kind, err.to_string())
    }
}

/// Applies classified changes to the remote catalog one key at a time.
///
/// Departments go first, then categories, then stock, so every taxon a
/// product needs exists before the product is created.
pub struct Reconciler<'a> {
    catalog: Arc<dyn CatalogClient>,
    images: &'a dyn ImageLocator,
    filter: &'a ProductFilter,
    options: ReconcileOptions,
    index: TaxonIndex,
    stock: ActionCounts,
    categories: CategoryCounts,
    sink: ErrorSink,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        images: &'a dyn ImageLocator,
        filter: &'a ProductFilter,
        options: ReconcileOptions,
        index: TaxonIndex,
    ) -> Self {
        Self {
            catalog,
            images,
            filter,
            options,
            index,
            stock: ActionCounts::default(),
            categories: CategoryCounts::default(),
            sink: ErrorSink::new(),
        }
    }

    pub fn index(&self) -> &TaxonIndex {
        &self.index
    }

    /// Returns the departments whose change did not reach the catalog.
    pub async fn apply_departments(
        &mut self,
        changes: &ChangeSet<RecordId>,
        previous: &NameMap,
        current: &NameMap,
    ) -> BTreeSet<RecordId> {
        let mut unsettled = BTreeSet::new();
        for (&id, &change) in &changes.changes {
            match change {
                Change::New => {
                    let name = current.get(&id).map(String::as_str).unwrap_or_default();
                    if let Err(err) = self.create_taxonomy(id, name).await {
                        self.category_failure(id, err);
                        unsettled.insert(id);
                    }
                }
                Change::Update => self.flag(
                    id,
                    "A department name has been updated. It might need to be renamed \
                     on the web store as well.",
                    previous.get(&id),
                    current.get(&id).map(String::as_str),
                ),
                Change::Delete => self.flag(
                    id,
                    "A department has been deleted. It might need to be removed from the web \
                     store, and its products might need to be updated.",
                    previous.get(&id),
                    Some(DELETED_STATE),
                ),
            }
        }
        unsettled
    }

    /// Returns the categories whose change did not reach the catalog.
    pub async fn apply_categories(
        &mut self,
        changes: &ChangeSet<RecordId>,
        previous: &NameMap,
        current: &NameMap,
        associations: &[CategoryAssociation],
    ) -> BTreeSet<RecordId> {
        let mut unsettled = BTreeSet::new();
        for (&id, &change) in &changes.changes {
            match change {
                Change::New => {
                    let name = current.get(&id).map(String::as_str).unwrap_or_default();
                    if let Err(err) = self.create_category(id, name, associations).await {
                        self.category_failure(id, err);
                        unsettled.insert(id);
                    }
                }
                Change::Update => self.flag(
                    id,
                    "A category name has been updated. It might need to be renamed \
                     on the web store as well.",
                    previous.get(&id),
                    current.get(&id).map(String::as_str),
                ),
                Change::Delete => self.flag(
                    id,
                    "A category has been deleted. It might need to be removed from the web \
                     store, and its products might need to be updated.",
                    previous.get(&id),
                    Some(DELETED_STATE),
                ),
            }
        }
        unsettled
    }

    /// Returns the stock ids whose remote state does not match `current`
    /// yet: failed remote calls and creates held back by a filter. Image
    /// uploads are joined before this returns.
    pub async fn apply_stock(
        &mut self,
        changes: &ChangeSet<RecordId>,
        previous: &StockRecords,
        current: &StockRecords,
        stock_categories: &BTreeMap<RecordId, RecordId>,
    ) -> BTreeSet<RecordId> {
        let pool = UploadPool::spawn(self.catalog.clone(), self.options.upload_workers);
        let mut unsettled = BTreeSet::new();

        for (&id, &change) in &changes.changes {
            let before = previous.get(&id);
            let after = current.get(&id);
            let was_published = before.is_some_and(StockRecord::published);
            let is_published = after.is_some_and(StockRecord::published);
            let action = eligibility::resolve(change, was_published, is_published);
            debug!(
                target = "catalog_sync.reconcile",
                stock_id = id,
                ?change,
                ?action,
                "stock_change"
            );

            let result = match (action, after) {
                (Action::Create, Some(record)) => {
                    match self.create_product(id, record, stock_categories, &pool).await {
                        Ok(None) => Ok(()),
                        Ok(Some(held)) => {
                            self.count_held(id, held);
                            unsettled.insert(id);
                            Ok(())
                        }
                        Err(err) => Err(err),
                    }
                }
                (Action::Update, Some(record)) => {
                    self.update_product(id, before, record, stock_categories).await
                }
                (Action::Delete, _) => self.delete_product(id).await,
                _ => {
                    self.stock.ignore += 1;
                    metrics::action_recorded("stock", "ignored");
                    Ok(())
                }
            };

            if let Err(err) = result {
                error!(
                    target = "catalog_sync.reconcile",
                    stock_id = id,
                    operation = err.kind.as_str(),
                    error = %err.detail,
                    "stock_action_failed"
                );
                metrics::action_recorded(err.kind.as_str(), "error");
                self.stock.error += 1;
                self.sink.failure(id, err.kind, err.detail);
                unsettled.insert(id);
            }
        }

        let uploads = pool.finish().await;
        self.stock.image += uploads.uploaded;
        self.stock.image_error += uploads.failed.len();
        for failure in uploads.failed {
            self.sink
                .failure(failure.stock_id, FailureKind::UploadImage, failure.detail);
        }
        unsettled
    }

    pub fn finish(self) -> ReconcileReport {
        ReconcileReport {
            stock: self.stock,
            categories: self.categories,
            sink: self.sink,
        }
    }

    async fn create_taxonomy(
        &mut self,
        department_id: RecordId,
        name: &str,
    ) -> Result<(), RecordError> {
        if self.index.taxonomy_for_department(department_id).is_some() {
            debug!(target = "catalog_sync.reconcile", department_id, "taxonomy_exists");
            self.categories.skipped += 1;
            return Ok(());
        }
        let fields = NewTaxonomy {
            name: capitalize(name),
            department_id,
        };
        let handle = self
            .catalog
            .create_taxonomy(&fields)
            .await
            .map_err(|err| RecordError::catalog(FailureKind::CreateTaxonomy, err))?;
        info!(
            target = "catalog_sync.reconcile",
            department_id,
            taxonomy_id = handle.id,
            name = %handle.name,
            "taxonomy_created"
        );
        metrics::action_recorded("create_taxonomy", "ok");
        self.index.insert_taxonomy(handle);
        self.categories.created += 1;
        Ok(())
    }

    async fn create_category(
        &mut self,
        category_id: RecordId,
        name: &str,
        associations: &[CategoryAssociation],
    ) -> Result<(), RecordError> {
        let departments: BTreeSet<RecordId> = associations
            .iter()
            .filter(|assoc| assoc.category_id == category_id && assoc.department_id != 0)
            .map(|assoc| assoc.department_id)
            .collect();
        if name.trim() == UNASSIGNED_CATEGORY || departments.is_empty() {
            debug!(
                target = "catalog_sync.reconcile",
                category_id,
                name,
                departments = departments.len(),
                "category_skipped"
            );
            self.categories.skipped += 1;
            return Ok(());
        }

        let mut first_error = None;
        for department_id in departments {
            let Some(taxonomy) = self.index.taxonomy_for_department(department_id) else {
                first_error.get_or_insert(RecordError::new(
                    FailureKind::CreateTaxon,
                    format!("department {department_id} has no taxonomy"),
                ));
                continue;
            };
            if self.index.taxon_for(category_id, taxonomy.id).is_some() {
                self.categories.skipped += 1;
                continue;
            }
            let fields = NewTaxon {
                name: capitalize(name),
                taxonomy_id: taxonomy.id,
                parent_id: taxonomy.root_id,
                category_id,
            };
            match self.catalog.create_taxon(&fields).await {
                Ok(handle) => {
                    info!(
                        target = "catalog_sync.reconcile",
                        category_id,
                        department_id,
                        taxon_id = handle.id,
                        "taxon_created"
                    );
                    metrics::action_recorded("create_taxon", "ok");
                    self.index.insert_taxon(handle);
                    self.categories.created += 1;
                }
                Err(err) => {
                    first_error.get_or_insert(RecordError::catalog(FailureKind::CreateTaxon, err));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// `Ok(Some(_))` when a filter held the record back.
    async fn create_product(
        &mut self,
        stock_id: RecordId,
        record: &StockRecord,
        stock_categories: &BTreeMap<RecordId, RecordId>,
        pool: &UploadPool,
    ) -> Result<Option<Held>, RecordError> {
        let barcode = record.barcode();
        if !self.filter.allows(&barcode) {
            return Ok(Some(Held::NotValid));
        }
        let image = self.images.find_image(&barcode);
        if self.options.only_with_images && image.is_none() {
            return Ok(Some(Held::NoImage));
        }
        if record.valid_weight().is_none() {
            return Ok(Some(Held::Weight));
        }

        let taxon_id = self
            .taxon_for(stock_id, record, stock_categories)
            .ok_or_else(|| {
                RecordError::new(
                    FailureKind::ResolveTaxon,
                    format!(
                        "no taxon for department {:?} and category {:?}",
                        record.department_id(),
                        stock_categories.get(&stock_id)
                    ),
                )
            })?;

        let existing = self
            .catalog
            .find_product_by_correlation_id(stock_id)
            .await
            .map_err(|err| RecordError::catalog(FailureKind::CreateProduct, err))?;
        if let Some(product) = existing {
            return self.restore_product(stock_id, record, taxon_id, product).await;
        }

        let fields = NewProduct::from_record(stock_id, record, taxon_id, Utc::now());
        let product = self
            .catalog
            .create_product(&fields)
            .await
            .map_err(|err| RecordError::catalog(FailureKind::CreateProduct, err))?;
        info!(
            target = "catalog_sync.reconcile",
            stock_id,
            product_id = product.id,
            sku = %fields.sku,
            "product_created"
        );
        metrics::action_recorded("create_product", "ok");
        self.stock.new += 1;

        match image {
            Some(path) => self.queue_upload(stock_id, path, product, pool).await,
            None => debug!(target = "catalog_sync.reconcile", stock_id, "no_image_to_upload"),
        }
        Ok(None)
    }

    /// Brings back a product an earlier run already created for this record,
    /// overwriting its fields and clearing the deletion marker.
    async fn restore_product(
        &mut self,
        stock_id: RecordId,
        record: &StockRecord,
        taxon_id: u64,
        product: ProductHandle,
    ) -> Result<Option<Held>, RecordError> {
        let fields = ProductUpdate::from_record(record, Some(taxon_id))
            .with_deletion(DeletionMarker::Clear, Utc::now());
        self.catalog
            .update_product(&product, &fields)
            .await
            .map_err(|err| RecordError::catalog(FailureKind::CreateProduct, err))?;
        info!(
            target = "catalog_sync.reconcile",
            stock_id,
            product_id = product.id,
            was_deleted = product.is_deleted(),
            "product_restored"
        );
        metrics::action_recorded("create_product", "restored");
        self.stock.new += 1;
        Ok(None)
    }

    async fn queue_upload(
        &mut self,
        stock_id: RecordId,
        path: PathBuf,
        product: ProductHandle,
        pool: &UploadPool,
    ) {
        let job = UploadJob {
            stock_id,
            path,
            product,
        };
        if let Err(job) = pool.submit(job).await {
            warn!(target = "catalog_sync.reconcile", stock_id, "upload_queue_closed");
            self.stock.image_error += 1;
            self.sink.failure(
                job.stock_id,
                FailureKind::UploadImage,
                "upload workers stopped before the image was queued",
            );
        }
    }

    async fn update_product(
        &mut self,
        stock_id: RecordId,
        before: Option<&StockRecord>,
        record: &StockRecord,
        stock_categories: &BTreeMap<RecordId, RecordId>,
    ) -> Result<(), RecordError> {
        let product = self.find_product(stock_id, FailureKind::UpdateProduct).await?;
        let previous_quantity = before.map(StockRecord::quantity).unwrap_or_default();
        let marker = DeletionMarker::for_quantity(previous_quantity, record.quantity());
        let taxon_id = self.taxon_for(stock_id, record, stock_categories);
        let fields = ProductUpdate::from_record(record, taxon_id).with_deletion(marker, Utc::now());
        self.catalog
            .update_product(&product, &fields)
            .await
            .map_err(|err| RecordError::catalog(FailureKind::UpdateProduct, err))?;
        info!(
            target = "catalog_sync.reconcile",
            stock_id,
            product_id = product.id,
            ?marker,
            "product_updated"
        );
        metrics::action_recorded("update_product", "ok");
        self.stock.update += 1;
        Ok(())
    }

    async fn delete_product(&mut self, stock_id: RecordId) -> Result<(), RecordError> {
        let product = self.find_product(stock_id, FailureKind::DeleteProduct).await?;
        self.catalog
            .soft_delete_product(&product)
            .await
            .map_err(|err| RecordError::catalog(FailureKind::DeleteProduct, err))?;
        info!(
            target = "catalog_sync.reconcile",
            stock_id,
            product_id = product.id,
            "product_deleted"
        );
        metrics::action_recorded("delete_product", "ok");
        self.stock.delete += 1;
        Ok(())
    }

    async fn find_product(
        &self,
        stock_id: RecordId,
        kind: FailureKind,
    ) -> Result<ProductHandle, RecordError> {
        match self.catalog.find_product_by_correlation_id(stock_id).await {
            Ok(Some(product)) => Ok(product),
            Ok(None) => Err(RecordError::catalog(
                kind,
                CatalogError::NotFound(crate::catalog::correlation_tag(stock_id)),
            )),
            Err(err) => Err(RecordError::catalog(kind, err)),
        }
    }

    fn taxon_for(
        &self,
        stock_id: RecordId,
        record: &StockRecord,
        stock_categories: &BTreeMap<RecordId, RecordId>,
    ) -> Option<u64> {
        let department_id = record.department_id()?;
        let category_id = stock_categories.get(&stock_id)?;
        self.index
            .resolve(department_id, *category_id)
            .map(|taxon| taxon.id)
    }

    fn count_held(&mut self, stock_id: RecordId, held: Held) {
        let reason = match held {
            Held::NotValid => {
                self.stock.ignored_not_valid += 1;
                "not_in_valid_products"
            }
            Held::NoImage => {
                self.stock.ignored_no_image += 1;
                "no_image"
            }
            Held::Weight => {
                self.stock.ignored_weight += 1;
                "invalid_weight"
            }
        };
        debug!(target = "catalog_sync.reconcile", stock_id, reason, "create_held_back");
        metrics::action_recorded("create_product", "held");
    }

    fn flag(
        &mut self,
        id: RecordId,
        message: &str,
        previous: Option<&String>,
        current: Option<&str>,
    ) {
        warn!(
            target = "catalog_sync.reconcile",
            id,
            reason = message,
            "category_change_needs_review"
        );
        self.sink.discrepancy(
            id,
            message,
            previous.map(String::as_str).unwrap_or_default(),
            current.unwrap_or_default(),
        );
        self.categories.flagged += 1;
    }

    fn category_failure(&mut self, id: RecordId, err: RecordError) {
        error!(
            target = "catalog_sync.reconcile",
            id,
            operation = err.kind.as_str(),
            error = %err.detail,
            "category_action_failed"
        );
        metrics::action_recorded(err.kind.as_str(), "error");
        self.categories.error += 1;
        self.sink.failure(id, err.kind, err.detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::MemoryCatalog;
    use crate::diff::compare;
    use crate::fingerprint::fingerprint_all;
    use crate::images::{NoImages, testing::FixedImages};

    fn stock(id: RecordId, published: &str, weight: &str, quantity: i64) -> StockRecord {
        let mut record = StockRecord::default();
        record.set("stock_id", id);
        record.set("Barcode", format!("SKU{id}").as_str());
        record.set("description", "Bag - woven");
        record.set("longdesc", "Woven bag");
        record.set("sell", 20.0);
        record.set("custom1", published);
        record.set("custom2", weight);
        record.set("quantity", quantity);
        record.set("dept_id", 10_i64);
        record
    }

    fn records(list: Vec<StockRecord>) -> StockRecords {
        list.into_iter()
            .map(|record| (record.stock_id().unwrap(), record))
            .collect()
    }

    fn categorised(ids: &[RecordId]) -> BTreeMap<RecordId, RecordId> {
        ids.iter().map(|id| (*id, 5)).collect()
    }

    fn catalog() -> Arc<MemoryCatalog> {
        Arc::new(MemoryCatalog::new().with_taxonomy(1, 10).with_taxon(100, 1, 5))
    }

    async fn reconciler<'a>(
        catalog: &Arc<MemoryCatalog>,
        images: &'a dyn ImageLocator,
        filter: &'a ProductFilter,
        options: ReconcileOptions,
    ) -> Reconciler<'a> {
        let index = TaxonIndex::load(catalog.as_ref()).await.unwrap();
        Reconciler::new(catalog.clone(), images, filter, options, index)
    }

    async fn run_stock(
        reconciler: &mut Reconciler<'_>,
        previous: &StockRecords,
        current: &StockRecords,
    ) -> BTreeSet<RecordId> {
        let changes = compare(&fingerprint_all(current), &fingerprint_all(previous));
        let ids: Vec<RecordId> = current.keys().chain(previous.keys()).copied().collect();
        let categories = categorised(&ids);
        reconciler
            .apply_stock(&changes, previous, current, &categories)
            .await
    }

    #[tokio::test]
    async fn first_run_creates_only_eligible_records() {
        let catalog = catalog();
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &NoImages, &filter, ReconcileOptions::default()).await;
        let current = records(vec![
            stock(1, "yes", "1.5", 3),
            stock(2, "yes", "0", 3),
            stock(3, "no", "1.5", 3),
        ]);

        let unsettled = run_stock(&mut reconciler, &StockRecords::new(), &current).await;
        let report = reconciler.finish();

        assert_eq!(report.stock.new, 1);
        assert_eq!(report.stock.ignored_weight, 1);
        assert_eq!(report.stock.ignore, 1);
        assert_eq!(report.stock.error, 0);
        let state = catalog.state.lock().unwrap();
        assert_eq!(state.created_products.len(), 1);
        assert_eq!(state.created_products[0].meta_description, "stock_id=1");
        assert_eq!(state.created_products[0].taxon_id, 100);
        assert_eq!(unsettled, BTreeSet::from([2]));
    }

    #[tokio::test]
    async fn restocked_product_is_undeleted() {
        let catalog = Arc::new(
            MemoryCatalog::new()
                .with_taxonomy(1, 10)
                .with_taxon(100, 1, 5)
                .with_product(77, 1, true),
        );
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &NoImages, &filter, ReconcileOptions::default()).await;
        let previous = records(vec![stock(1, "yes", "1.5", 0)]);
        let current = records(vec![stock(1, "yes", "1.5", 5)]);

        let unsettled = run_stock(&mut reconciler, &previous, &current).await;

        assert!(unsettled.is_empty());
        assert_eq!(reconciler.finish().stock.update, 1);
        let state = catalog.state.lock().unwrap();
        let (product_id, update) = &state.updates[0];
        assert_eq!(*product_id, 77);
        assert_eq!(update.deleted_at, Some(None));
        assert_eq!(update.on_hand, Some(5));
        assert!(!state.products[0].is_deleted());
    }

    #[tokio::test]
    async fn sold_out_product_is_hidden() {
        let catalog = Arc::new(MemoryCatalog::new().with_product(77, 1, false));
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &NoImages, &filter, ReconcileOptions::default()).await;
        let previous = records(vec![stock(1, "yes", "1.5", 2)]);
        let current = records(vec![stock(1, "yes", "1.5", 0)]);

        run_stock(&mut reconciler, &previous, &current).await;

        let state = catalog.state.lock().unwrap();
        assert!(matches!(state.updates[0].1.deleted_at, Some(Some(_))));
        // taxon could not be resolved, so the remote one is left alone
        assert_eq!(state.updates[0].1.taxon_id, None);
    }

    #[tokio::test]
    async fn missing_remote_product_is_an_error_not_a_crash() {
        let catalog = catalog();
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &NoImages, &filter, ReconcileOptions::default()).await;
        let previous = records(vec![stock(1, "yes", "1.5", 2), stock(2, "yes", "1.5", 2)]);
        let current = records(vec![stock(1, "yes", "1.5", 4)]);

        let unsettled = run_stock(&mut reconciler, &previous, &current).await;
        let report = reconciler.finish();

        assert_eq!(report.stock.error, 2);
        assert_eq!(unsettled, BTreeSet::from([1, 2]));
        let kinds: Vec<_> = report.sink.failures().iter().map(|f| f.kind).collect();
        assert_eq!(kinds, vec![FailureKind::UpdateProduct, FailureKind::DeleteProduct]);
    }

    #[tokio::test]
    async fn unpublishing_soft_deletes() {
        let catalog = Arc::new(MemoryCatalog::new().with_product(77, 1, false));
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &NoImages, &filter, ReconcileOptions::default()).await;
        let previous = records(vec![stock(1, "yes", "1.5", 2)]);
        let current = records(vec![stock(1, "no", "1.5", 2)]);

        run_stock(&mut reconciler, &previous, &current).await;

        assert_eq!(reconciler.finish().stock.delete, 1);
        assert_eq!(catalog.state.lock().unwrap().soft_deleted, vec![77]);
    }

    #[tokio::test]
    async fn republished_record_keeps_a_single_product() {
        let catalog = catalog();
        let filter = ProductFilter::All;
        let passes = [
            records(vec![stock(1, "yes", "1.5", 3)]),
            records(vec![stock(1, "no", "1.5", 3)]),
            records(vec![stock(1, "yes", "1.5", 3)]),
            records(vec![stock(1, "yes", "1.5", 0)]),
        ];

        let mut previous = StockRecords::new();
        for current in passes {
            let mut reconciler =
                reconciler(&catalog, &NoImages, &filter, ReconcileOptions::default()).await;
            let unsettled = run_stock(&mut reconciler, &previous, &current).await;
            assert!(unsettled.is_empty());
            assert_eq!(reconciler.finish().stock.error, 0);
            previous = current;
        }

        let state = catalog.state.lock().unwrap();
        assert_eq!(state.created_products.len(), 1);
        assert_eq!(state.products.len(), 1);
        assert_eq!(state.soft_deleted, vec![1001]);
        let targets: Vec<u64> = state.updates.iter().map(|(id, _)| *id).collect();
        assert_eq!(targets, vec![1001, 1001]);
        // republish clears the marker, selling out sets it again
        assert_eq!(state.updates[0].1.deleted_at, Some(None));
        assert_eq!(state.updates[0].1.taxon_id, Some(100));
        assert!(matches!(state.updates[1].1.deleted_at, Some(Some(_))));
        assert!(state.products[0].is_deleted());
    }

    #[tokio::test]
    async fn live_product_wins_over_a_deleted_copy() {
        let catalog = Arc::new(
            MemoryCatalog::new()
                .with_taxonomy(1, 10)
                .with_taxon(100, 1, 5)
                .with_product(77, 1, true)
                .with_product(78, 1, false),
        );
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &NoImages, &filter, ReconcileOptions::default()).await;
        let previous = records(vec![stock(1, "yes", "1.5", 2)]);
        let current = records(vec![stock(1, "yes", "1.5", 0)]);

        run_stock(&mut reconciler, &previous, &current).await;

        let state = catalog.state.lock().unwrap();
        assert_eq!(state.updates[0].0, 78);
        assert!(state.products[1].is_deleted());
    }

    #[tokio::test]
    async fn unresolved_taxon_counts_an_error() {
        let catalog = Arc::new(MemoryCatalog::new().with_taxonomy(1, 10));
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &NoImages, &filter, ReconcileOptions::default()).await;
        let current = records(vec![stock(1, "yes", "1.5", 2)]);

        let unsettled = run_stock(&mut reconciler, &StockRecords::new(), &current).await;
        let report = reconciler.finish();

        assert_eq!(report.stock.error, 1);
        assert_eq!(report.sink.failures()[0].kind, FailureKind::ResolveTaxon);
        assert_eq!(unsettled, BTreeSet::from([1]));
        assert!(catalog.state.lock().unwrap().created_products.is_empty());
    }

    #[tokio::test]
    async fn failed_upload_keeps_the_created_product() {
        let catalog = catalog();
        catalog.state.lock().unwrap().fail_uploads = true;
        let images = FixedImages::new([("SKU1", "/images/S/SKU1.JPG")]);
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &images, &filter, ReconcileOptions::default()).await;
        let current = records(vec![stock(1, "yes", "1.5", 2)]);

        let unsettled = run_stock(&mut reconciler, &StockRecords::new(), &current).await;
        let report = reconciler.finish();

        assert!(unsettled.is_empty());
        assert_eq!(report.stock.new, 1);
        assert_eq!(report.stock.image_error, 1);
        assert_eq!(report.stock.error, 0);
        assert_eq!(report.sink.failures()[0].kind, FailureKind::UploadImage);
    }

    #[tokio::test]
    async fn created_product_gets_its_image() {
        let catalog = catalog();
        let images = FixedImages::new([("SKU1", "/images/S/SKU1.JPG")]);
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &images, &filter, ReconcileOptions::default()).await;
        let current = records(vec![stock(1, "yes", "1.5", 2)]);

        run_stock(&mut reconciler, &StockRecords::new(), &current).await;

        assert_eq!(reconciler.finish().stock.image, 1);
        let state = catalog.state.lock().unwrap();
        assert_eq!(state.uploads[0].1, "sku1");
    }

    #[tokio::test]
    async fn creation_filters_hold_records_back() {
        let catalog = catalog();
        let filter = ProductFilter::from_barcodes(["sku1 ", "SKU2"]);
        let options = ReconcileOptions {
            only_with_images: true,
            ..ReconcileOptions::default()
        };
        let images = FixedImages::new([("SKU1", "/images/S/SKU1.JPG")]);
        let mut reconciler = reconciler(&catalog, &images, &filter, options).await;
        let current = records(vec![
            stock(1, "yes", "1.5", 2),
            stock(2, "yes", "1.5", 2),
            stock(3, "yes", "1.5", 2),
        ]);

        let unsettled = run_stock(&mut reconciler, &StockRecords::new(), &current).await;
        let report = reconciler.finish();

        assert_eq!(report.stock.new, 1);
        assert_eq!(report.stock.ignored_no_image, 1);
        assert_eq!(report.stock.ignored_not_valid, 1);
        assert_eq!(unsettled, BTreeSet::from([2, 3]));
    }

    #[tokio::test]
    async fn new_department_and_category_become_resolvable() {
        let catalog = Arc::new(MemoryCatalog::new());
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &NoImages, &filter, ReconcileOptions::default()).await;
        let departments = NameMap::from([(10, "ACCESSORY".to_string())]);
        let categories = NameMap::from([(5, "BAGS".to_string())]);
        let associations = [CategoryAssociation {
            department_id: 10,
            level: 1,
            category_id: 5,
        }];

        let failed_departments = reconciler
            .apply_departments(
                &compare(&departments, &NameMap::new()),
                &NameMap::new(),
                &departments,
            )
            .await;
        let failed_categories = reconciler
            .apply_categories(
                &compare(&categories, &NameMap::new()),
                &NameMap::new(),
                &categories,
                &associations,
            )
            .await;

        assert!(failed_departments.is_empty() && failed_categories.is_empty());
        assert!(reconciler.index().resolve(10, 5).is_some());
        let report = reconciler.finish();
        assert_eq!(report.categories.created, 2);
        let state = catalog.state.lock().unwrap();
        assert_eq!(state.created_taxonomies[0].name, "Accessory");
        assert_eq!(state.created_taxons[0].name, "Bags");
        assert_eq!(state.created_taxons[0].parent_id, state.taxonomies[0].root_id);
    }

    #[tokio::test]
    async fn sentinel_and_orphan_categories_are_skipped() {
        let catalog = catalog();
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &NoImages, &filter, ReconcileOptions::default()).await;
        let categories = NameMap::from([
            (0, UNASSIGNED_CATEGORY.to_string()),
            (6, "HATS".to_string()),
        ]);
        let associations = [CategoryAssociation {
            department_id: 0,
            level: 1,
            category_id: 6,
        }];

        let failed = reconciler
            .apply_categories(
                &compare(&categories, &NameMap::new()),
                &NameMap::new(),
                &categories,
                &associations,
            )
            .await;

        assert!(failed.is_empty());
        assert_eq!(reconciler.finish().categories.skipped, 2);
        assert!(catalog.state.lock().unwrap().created_taxons.is_empty());
    }

    #[tokio::test]
    async fn renames_and_deletions_are_only_reported() {
        let catalog = catalog();
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &NoImages, &filter, ReconcileOptions::default()).await;
        let previous = NameMap::from([(5, "BAGS".to_string()), (6, "HATS".to_string())]);
        let current = NameMap::from([(5, "TOTES".to_string())]);

        reconciler
            .apply_categories(&compare(&current, &previous), &previous, &current, &[])
            .await;
        let report = reconciler.finish();

        assert_eq!(report.categories.flagged, 2);
        let discrepancies = report.sink.discrepancies();
        assert_eq!(discrepancies[0].new_state, "TOTES");
        assert_eq!(discrepancies[1].new_state, DELETED_STATE);
        assert!(catalog.state.lock().unwrap().created_taxons.is_empty());
    }

    #[tokio::test]
    async fn failed_taxon_create_is_unsettled() {
        let catalog = catalog();
        catalog.state.lock().unwrap().fail_taxon_creates = true;
        let filter = ProductFilter::All;
        let mut reconciler =
            reconciler(&catalog, &NoImages, &filter, ReconcileOptions::default()).await;
        let categories = NameMap::from([(6, "HATS".to_string())]);
        let associations = [CategoryAssociation {
            department_id: 10,
            level: 1,
            category_id: 6,
        }];

        let failed = reconciler
            .apply_categories(
                &compare(&categories, &NameMap::new()),
                &NameMap::new(),
                &categories,
                &associations,
            )
            .await;

        assert_eq!(failed, BTreeSet::from([6]));
        assert_eq!(reconciler.finish().categories.error, 1);
    }

    #[test]
    fn allow_list_is_case_and_space_insensitive() {
        let filter = ProductFilter::from_barcodes([" smbl6132"]);
        assert!(filter.allows("SMBL6132 "));
        assert!(!filter.allows("SMBL6133"));
        assert!(ProductFilter::All.allows("anything"));
    }

    #[test]
    fn missing_allow_list_admits_everything() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("valid_products.yml");
        assert_eq!(ProductFilter::load(Some(&missing)), ProductFilter::All);
        assert_eq!(ProductFilter::load(None), ProductFilter::All);

        std::fs::write(&missing, "- SMBL6132\n- smbl6133\n").unwrap();
        let loaded = ProductFilter::load(Some(&missing));
        assert!(loaded.allows("SMBL6133"));
        assert!(!loaded.allows("SMBL6134"));
    }
}
