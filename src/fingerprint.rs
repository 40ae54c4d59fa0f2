use crate::models::{FingerprintMap, StockField, StockRecord, StockRecords};
use sha2::{Digest, Sha256};

/// Stable digest over the changeable columns of a record.
pub fn fingerprint(record: &StockRecord) -> String {
    let mut hasher = Sha256::new();
    for field in StockField::CHANGEABLE {
        if let Some(value) = record.field(field) {
            hasher.update(value.to_string().as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Rebuilds the full fingerprint map for a set of records.
pub fn fingerprint_all(records: &StockRecords) -> FingerprintMap {
    records
        .iter()
        .map(|(id, record)| (*id, fingerprint(record)))
        .collect()
}
