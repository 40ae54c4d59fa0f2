use crate::images::ImageLocator;
use crate::models::{RecordId, StockRecords};
use crate::reconcile::ProductFilter;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditIssue {
    NoImage,
    InvalidWeight,
    NotInValidProducts,
}

/// A published record that would not make it into the catalog as is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditFinding {
    pub stock_id: RecordId,
    pub barcode: String,
    pub description: String,
    pub issues: Vec<AuditIssue>,
}

/// Checks every published record against the creation rules without
/// touching the catalog or the snapshots.
pub fn audit_records(
    records: &StockRecords,
    images: &dyn ImageLocator,
    filter: &ProductFilter,
) -> Vec<AuditFinding> {
    records
        .iter()
        .filter(|(_, record)| record.published())
        .filter_map(|(&stock_id, record)| {
            let barcode = record.barcode();
            let mut issues = Vec::new();
            if images.find_image(&barcode).is_none() {
                issues.push(AuditIssue::NoImage);
            }
            if record.valid_weight().is_none() {
                issues.push(AuditIssue::InvalidWeight);
            }
            if !filter.allows(&barcode) {
                issues.push(AuditIssue::NotInValidProducts);
            }
            (!issues.is_empty()).then(|| AuditFinding {
                stock_id,
                barcode,
                description: record.description(),
                issues,
            })
        })
        .collect()
}

pub fn log_findings(findings: &[AuditFinding]) {
    for finding in findings {
        warn!(
            target = "catalog_sync.audit",
            stock_id = finding.stock_id,
            barcode = %finding.barcode,
            description = %finding.description,
            issues = ?finding.issues,
            "record_not_ready_for_web_store"
        );
    }
    info!(target = "catalog_sync.audit", findings = findings.len(), "audit_finished");
}
