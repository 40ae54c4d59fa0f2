pub mod index;
pub mod products;
pub mod spree;
pub mod taxonomy;
#[cfg(test)]
pub mod testing;

pub use index::TaxonIndex;
pub use products::{NewProduct, ProductHandle, ProductUpdate};
pub use spree::SpreeClient;
pub use taxonomy::{NewTaxon, NewTaxonomy, TaxonHandle, TaxonomyHandle};

use crate::models::RecordId;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("no catalog product carries {0}")]
    NotFound(String),
    #[error("could not read {path}: {message}")]
    File { path: String, message: String },
}

/// Remote e-commerce catalog operations used by the reconciler.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn list_taxonomies(&self) -> Result<Vec<TaxonomyHandle>, CatalogError>;

    async fn list_taxons(&self) -> Result<Vec<TaxonHandle>, CatalogError>;

    async fn create_taxonomy(&self, fields: &NewTaxonomy) -> Result<TaxonomyHandle, CatalogError>;

    async fn create_taxon(&self, fields: &NewTaxon) -> Result<TaxonHandle, CatalogError>;

    async fn create_product(&self, fields: &NewProduct) -> Result<ProductHandle, CatalogError>;

    /// Product whose correlation tag names `stock_id`, if any.
    async fn find_product_by_correlation_id(
        &self,
        stock_id: RecordId,
    ) -> Result<Option<ProductHandle>, CatalogError>;

    async fn update_product(
        &self,
        product: &ProductHandle,
        fields: &ProductUpdate,
    ) -> Result<(), CatalogError>;

    /// Stamps `deleted_at` with the current time.
    async fn soft_delete_product(&self, product: &ProductHandle) -> Result<(), CatalogError>;

    async fn upload_image(&self, path: &Path, product: &ProductHandle) -> Result<(), CatalogError>;
}

const CORRELATION_KEY: &str = "stock_id";

/// Hidden metadata value tying a remote product back to its stock record.
pub fn correlation_tag(stock_id: RecordId) -> String {
    format!("{CORRELATION_KEY}={stock_id}")
}

pub fn parse_correlation_tag(tag: &str) -> Option<RecordId> {
    let (key, value) = tag.split_once('=')?;
    if key.trim() != CORRELATION_KEY {
        return None;
    }
    value.trim().parse().ok()
}
