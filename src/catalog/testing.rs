use super::{
    CatalogClient, CatalogError, NewProduct, NewTaxon, NewTaxonomy, ProductHandle, ProductUpdate,
    TaxonHandle, TaxonomyHandle,
};
use crate::models::RecordId;
use async_trait::async_trait;
use chrono::Utc;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Catalog held in memory, recording every mutating call.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    pub state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
pub struct MemoryState {
    pub taxonomies: Vec<TaxonomyHandle>,
    pub taxons: Vec<TaxonHandle>,
    pub products: Vec<ProductHandle>,
    pub created_products: Vec<NewProduct>,
    pub created_taxonomies: Vec<NewTaxonomy>,
    pub created_taxons: Vec<NewTaxon>,
    pub updates: Vec<(u64, ProductUpdate)>,
    pub soft_deleted: Vec<u64>,
    pub uploads: Vec<(PathBuf, String)>,
    pub fail_creates_for: HashSet<String>,
    pub fail_uploads: bool,
    pub fail_taxon_creates: bool,
    next_id: u64,
}

impl MemoryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        1000 + self.next_id
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_taxonomy(self, id: u64, department_id: RecordId) -> Self {
        self.state.lock().unwrap().taxonomies.push(TaxonomyHandle {
            id,
            name: format!("Department {department_id}"),
            department_id: Some(department_id),
            root_id: Some(id * 10),
        });
        self
    }

    pub fn with_taxon(self, id: u64, taxonomy_id: u64, category_id: RecordId) -> Self {
        self.state.lock().unwrap().taxons.push(TaxonHandle {
            id,
            name: format!("Category {category_id}"),
            taxonomy_id,
            category_id: Some(category_id),
            permalink: None,
        });
        self
    }

    pub fn with_product(self, id: u64, stock_id: RecordId, deleted: bool) -> Self {
        self.state.lock().unwrap().products.push(ProductHandle {
            id,
            permalink: format!("product-{id}"),
            name: None,
            meta_description: Some(super::correlation_tag(stock_id)),
            deleted_at: deleted.then(Utc::now),
        });
        self
    }

    pub fn product_for(&self, stock_id: RecordId) -> Option<ProductHandle> {
        self.state
            .lock()
            .unwrap()
            .products
            .iter()
            .filter(|p| p.correlation_id() == Some(stock_id))
            .min_by_key(|p| p.is_deleted())
            .cloned()
    }
}

#[async_trait]
impl CatalogClient for MemoryCatalog {
    async fn list_taxonomies(&self) -> Result<Vec<TaxonomyHandle>, CatalogError> {
        Ok(self.state.lock().unwrap().taxonomies.clone())
    }

    async fn list_taxons(&self) -> Result<Vec<TaxonHandle>, CatalogError> {
        Ok(self.state.lock().unwrap().taxons.clone())
    }

    async fn create_taxonomy(&self, fields: &NewTaxonomy) -> Result<TaxonomyHandle, CatalogError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let handle = TaxonomyHandle {
            id,
            name: fields.name.clone(),
            department_id: Some(fields.department_id),
            root_id: Some(id * 10),
        };
        state.created_taxonomies.push(fields.clone());
        state.taxonomies.push(handle.clone());
        Ok(handle)
    }

    async fn create_taxon(&self, fields: &NewTaxon) -> Result<TaxonHandle, CatalogError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_taxon_creates {
            return Err(CatalogError::Status {
                status: 422,
                body: "taxon rejected".into(),
            });
        }
        let id = state.next_id();
        let handle = TaxonHandle {
            id,
            name: fields.name.clone(),
            taxonomy_id: fields.taxonomy_id,
            category_id: Some(fields.category_id),
            permalink: None,
        };
        state.created_taxons.push(fields.clone());
        state.taxons.push(handle.clone());
        Ok(handle)
    }

    async fn create_product(&self, fields: &NewProduct) -> Result<ProductHandle, CatalogError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_creates_for.contains(&fields.sku) {
            return Err(CatalogError::Status {
                status: 422,
                body: "product rejected".into(),
            });
        }
        let id = state.next_id();
        let handle = ProductHandle {
            id,
            permalink: fields.sku.to_lowercase(),
            name: Some(fields.name.clone()),
            meta_description: Some(fields.meta_description.clone()),
            deleted_at: None,
        };
        state.created_products.push(fields.clone());
        state.products.push(handle.clone());
        Ok(handle)
    }

    async fn find_product_by_correlation_id(
        &self,
        stock_id: RecordId,
    ) -> Result<Option<ProductHandle>, CatalogError> {
        Ok(self.product_for(stock_id))
    }

    async fn update_product(
        &self,
        product: &ProductHandle,
        fields: &ProductUpdate,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.updates.push((product.id, fields.clone()));
        if let Some(marker) = fields.deleted_at
            && let Some(stored) = state.products.iter_mut().find(|p| p.id == product.id)
        {
            stored.deleted_at = marker;
        }
        Ok(())
    }

    async fn soft_delete_product(&self, product: &ProductHandle) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        state.soft_deleted.push(product.id);
        if let Some(stored) = state.products.iter_mut().find(|p| p.id == product.id) {
            stored.deleted_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn upload_image(&self, path: &Path, product: &ProductHandle) -> Result<(), CatalogError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_uploads {
            return Err(CatalogError::Request("upload timed out".into()));
        }
        state
            .uploads
            .push((path.to_path_buf(), product.permalink.clone()));
        Ok(())
    }
}
