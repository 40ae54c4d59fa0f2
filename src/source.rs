use crate::models::{CategoryAssociation, FieldValue, NameMap, RecordId, StockRecord, StockRecords};
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("inventory source is not connected")]
    NotConnected,
    #[error("could not open inventory export {path}: {message}")]
    Connect { path: PathBuf, message: String },
    #[error("inventory query failed: {0}")]
    Query(String),
}

/// Association level that links a category to its department.
pub const DEPARTMENT_LEVEL: i64 = 1;

/// Read side of the legacy inventory database.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn connect(&mut self) -> Result<(), SourceError>;

    async fn disconnect(&mut self);

    async fn fetch_stock_records(&self) -> Result<StockRecords, SourceError>;

    /// Departments without the `0` placeholder.
    async fn fetch_departments(&self) -> Result<NameMap, SourceError>;

    async fn fetch_categories(&self) -> Result<NameMap, SourceError>;

    /// Department links for level-one categories.
    async fn fetch_category_associations(&self) -> Result<Vec<CategoryAssociation>, SourceError>;

    /// Stock id -> leaf category id.
    async fn fetch_stock_categories(&self) -> Result<BTreeMap<RecordId, RecordId>, SourceError>;
}

/// Everything one run reads from the inventory.
#[derive(Debug, Clone, Default)]
pub struct InventoryData {
    pub stock: StockRecords,
    pub departments: NameMap,
    pub categories: NameMap,
    pub associations: Vec<CategoryAssociation>,
    pub stock_categories: BTreeMap<RecordId, RecordId>,
}

/// Connects, reads every table, and always disconnects.
pub async fn fetch_inventory(
    source: &mut dyn InventorySource,
) -> Result<InventoryData, SourceError> {
    source.connect().await?;
    let result = read_all(&*source).await;
    source.disconnect().await;
    result
}

async fn read_all(source: &dyn InventorySource) -> Result<InventoryData, SourceError> {
    let departments = source.fetch_departments().await?;
    let categories = source.fetch_categories().await?;
    let associations = source.fetch_category_associations().await?;
    let stock = source.fetch_stock_records().await?;
    let stock_categories = source.fetch_stock_categories().await?;
    debug!(
        target = "catalog_sync.source",
        stock = stock.len(),
        departments = departments.len(),
        categories = categories.len(),
        "inventory_fetched"
    );
    Ok(InventoryData {
        stock,
        departments,
        categories,
        associations,
        stock_categories,
    })
}

#[derive(Debug, Clone, Deserialize)]
struct NamedRow {
    id: RecordId,
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StockCategoryRow {
    stock_id: RecordId,
    category_id: RecordId,
}

/// Table dump written by the inventory export job.
#[derive(Debug, Clone, Default, Deserialize)]
struct InventoryExport {
    #[serde(default)]
    stock: Vec<BTreeMap<String, FieldValue>>,
    #[serde(default)]
    departments: Vec<NamedRow>,
    #[serde(default)]
    categories: Vec<NamedRow>,
    #[serde(default)]
    categorised_values: Vec<CategoryAssociation>,
    #[serde(default)]
    categorised_stock: Vec<StockCategoryRow>,
}

/// Reads the inventory tables from a YAML export file.
#[derive(Debug)]
pub struct ExportSource {
    path: PathBuf,
    export: Option<InventoryExport>,
}

impl ExportSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            export: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn export(&self) -> Result<&InventoryExport, SourceError> {
        self.export.as_ref().ok_or(SourceError::NotConnected)
    }
}

#[async_trait]
impl InventorySource for ExportSource {
    async fn connect(&mut self) -> Result<(), SourceError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| SourceError::Connect {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        let export: InventoryExport =
            serde_yaml::from_str(&raw).map_err(|err| SourceError::Connect {
                path: self.path.clone(),
                message: err.to_string(),
            })?;
        debug!(target = "catalog_sync.source", path = %self.path.display(), "connected");
        self.export = Some(export);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.export.take().is_some() {
            debug!(target = "catalog_sync.source", path = %self.path.display(), "disconnected");
        }
    }

    async fn fetch_stock_records(&self) -> Result<StockRecords, SourceError> {
        let mut records = StockRecords::new();
        for (row_index, fields) in self.export()?.stock.iter().enumerate() {
            let record = StockRecord::new(fields.clone());
            let id = record.stock_id().ok_or_else(|| {
                SourceError::Query(format!("stock row {row_index} has no stock_id"))
            })?;
            if id > 0 {
                records.insert(id, record);
            }
        }
        Ok(records)
    }

    async fn fetch_departments(&self) -> Result<NameMap, SourceError> {
        Ok(self
            .export()?
            .departments
            .iter()
            .filter(|row| row.id != 0)
            .map(|row| (row.id, row.name.clone()))
            .collect())
    }

    async fn fetch_categories(&self) -> Result<NameMap, SourceError> {
        Ok(self
            .export()?
            .categories
            .iter()
            .map(|row| (row.id, row.name.clone()))
            .collect())
    }

    async fn fetch_category_associations(&self) -> Result<Vec<CategoryAssociation>, SourceError> {
        Ok(self
            .export()?
            .categorised_values
            .iter()
            .filter(|assoc| assoc.level == DEPARTMENT_LEVEL)
            .copied()
            .collect())
    }

    async fn fetch_stock_categories(&self) -> Result<BTreeMap<RecordId, RecordId>, SourceError> {
        Ok(self
            .export()?
            .categorised_stock
            .iter()
            .map(|row| (row.stock_id, row.category_id))
            .collect())
    }
}
