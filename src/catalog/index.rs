use super::{CatalogClient, CatalogError, TaxonHandle, TaxonomyHandle};
use crate::models::RecordId;
use std::collections::HashMap;
use tracing::debug;

/// Lookup tables from inventory ids to catalog taxonomy/taxon handles.
///
/// Built once per run from the catalog listing, then extended as new
/// taxonomies and taxons are created during the same run.
#[derive(Debug, Clone, Default)]
pub struct TaxonIndex {
    by_department: HashMap<RecordId, TaxonomyHandle>,
    by_category: HashMap<(RecordId, u64), TaxonHandle>,
}

impl TaxonIndex {
    pub fn build(taxonomies: Vec<TaxonomyHandle>, taxons: Vec<TaxonHandle>) -> Self {
        let mut index = Self::default();
        for taxonomy in taxonomies {
            index.insert_taxonomy(taxonomy);
        }
        for taxon in taxons {
            index.insert_taxon(taxon);
        }
        index
    }

    /// Lists the catalog's taxonomies and taxons once.
    pub async fn load(catalog: &dyn CatalogClient) -> Result<Self, CatalogError> {
        let taxonomies = catalog.list_taxonomies().await?;
        let taxons = catalog.list_taxons().await?;
        let index = Self::build(taxonomies, taxons);
        debug!(
            target = "catalog_sync.catalog",
            taxonomies = index.taxonomy_count(),
            taxons = index.taxon_count(),
            "taxon_index_loaded"
        );
        Ok(index)
    }

    /// Handles without an inventory id are not indexable and are dropped.
    /// The first handle seen for a key wins.
    pub fn insert_taxonomy(&mut self, taxonomy: TaxonomyHandle) {
        if let Some(department_id) = taxonomy.department_id {
            self.by_department.entry(department_id).or_insert(taxonomy);
        }
    }

    pub fn insert_taxon(&mut self, taxon: TaxonHandle) {
        if let Some(category_id) = taxon.category_id {
            self.by_category
                .entry((category_id, taxon.taxonomy_id))
                .or_insert(taxon);
        }
    }

    pub fn taxonomy_for_department(&self, department_id: RecordId) -> Option<&TaxonomyHandle> {
        self.by_department.get(&department_id)
    }

    pub fn taxon_for(&self, category_id: RecordId, taxonomy_id: u64) -> Option<&TaxonHandle> {
        self.by_category.get(&(category_id, taxonomy_id))
    }

    /// Leaf taxon for a product in `department_id` classified as `category_id`.
    pub fn resolve(&self, department_id: RecordId, category_id: RecordId) -> Option<&TaxonHandle> {
        let taxonomy = self.taxonomy_for_department(department_id)?;
        self.taxon_for(category_id, taxonomy.id)
    }

    pub fn taxonomy_count(&self) -> usize {
        self.by_department.len()
    }

    pub fn taxon_count(&self) -> usize {
        self.by_category.len()
    }
}
