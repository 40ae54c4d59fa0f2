use super::{correlation_tag, parse_correlation_tag};
use crate::models::{RecordId, StockRecord};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Product as returned by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductHandle {
    pub id: u64,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub meta_description: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ProductHandle {
    pub fn correlation_id(&self) -> Option<RecordId> {
        self.meta_description
            .as_deref()
            .and_then(parse_correlation_tag)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Payload for a product that does not exist remotely yet.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub sku: String,
    pub price: f64,
    pub on_hand: i64,
    pub weight: Option<f64>,
    pub taxon_id: u64,
    pub available_on: DateTime<Utc>,
    pub meta_description: String,
}

impl NewProduct {
    pub fn from_record(
        stock_id: RecordId,
        record: &StockRecord,
        taxon_id: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            name: record.description(),
            description: record.long_description(),
            sku: record.barcode(),
            price: record.sell_price(),
            on_hand: record.quantity(),
            weight: record.valid_weight(),
            taxon_id,
            available_on: now - Duration::days(1),
            meta_description: correlation_tag(stock_id),
        }
    }
}

/// Mutable product fields. `None` leaves the remote value untouched;
/// `deleted_at: Some(None)` clears the deletion marker.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub sku: Option<String>,
    pub price: Option<f64>,
    pub on_hand: Option<i64>,
    pub weight: Option<f64>,
    pub taxon_id: Option<u64>,
    pub deleted_at: Option<Option<DateTime<Utc>>>,
}

impl ProductUpdate {
    /// Overwrites every mutable field from the current record.
    pub fn from_record(record: &StockRecord, taxon_id: Option<u64>) -> Self {
        Self {
            name: Some(record.description()),
            description: Some(record.long_description()),
            sku: Some(record.barcode()),
            price: Some(record.sell_price()),
            on_hand: Some(record.quantity()),
            weight: record.valid_weight(),
            taxon_id,
            deleted_at: None,
        }
    }

    pub fn with_deletion(mut self, marker: DeletionMarker, now: DateTime<Utc>) -> Self {
        self.deleted_at = match marker {
            DeletionMarker::Keep => None,
            DeletionMarker::Set => Some(Some(now)),
            DeletionMarker::Clear => Some(None),
        };
        self
    }
}

/// How an update treats the remote soft-delete timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionMarker {
    Keep,
    Set,
    Clear,
}

impl DeletionMarker {
    /// Stock running out hides a product; stock coming back shows it again.
    pub fn for_quantity(previous: i64, current: i64) -> Self {
        if previous > 0 && current == 0 {
            DeletionMarker::Set
        } else if previous == 0 && current > 0 {
            DeletionMarker::Clear
        } else {
            DeletionMarker::Keep
        }
    }
}
