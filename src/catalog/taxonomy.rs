use crate::models::RecordId;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Top-level catalog grouping; mirrors an inventory department.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyHandle {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub department_id: Option<RecordId>,
    /// Root taxon that new child taxons hang from.
    #[serde(default)]
    pub root_id: Option<u64>,
}

/// Second-level catalog node; mirrors an inventory category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonHandle {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub taxonomy_id: u64,
    #[serde(default)]
    pub category_id: Option<RecordId>,
    #[serde(default)]
    pub permalink: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTaxonomy {
    pub name: String,
    pub department_id: RecordId,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewTaxon {
    pub name: String,
    pub taxonomy_id: u64,
    pub parent_id: Option<u64>,
    pub category_id: RecordId,
}
