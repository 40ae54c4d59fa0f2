use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Integer identity shared by stock records, departments and categories.
pub type RecordId = i64;

/// Stock id -> record, as stored in the stock snapshot.
pub type StockRecords = BTreeMap<RecordId, StockRecord>;

/// Stock id -> content digest, as stored in the fingerprint snapshot.
pub type FingerprintMap = BTreeMap<RecordId, String>;

/// Id -> display name for departments or categories.
pub type NameMap = BTreeMap<RecordId, String>;

/// Department/category names that mean "unassigned" in the inventory.
pub const UNASSIGNED_CATEGORY: &str = "<N/A>";

/// Valid product weights sit strictly between these bounds.
pub const MIN_WEIGHT: f64 = 0.0;
pub const MAX_WEIGHT: f64 = 10.0;

/// A single cell from the inventory tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Numeric view using the inventory's lenient rules: leading number of a
    /// text value, zero when nothing parses.
    pub fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Null => 0.0,
            FieldValue::Bool(value) => f64::from(u8::from(*value)),
            FieldValue::Int(value) => *value as f64,
            FieldValue::Float(value) => *value,
            FieldValue::Text(value) => leading_number(value),
        }
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            FieldValue::Int(value) => *value,
            other => other.as_f64().trunc() as i64,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => Ok(()),
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
            FieldValue::Text(value) => f.write_str(value),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

fn leading_number(raw: &str) -> f64 {
    let trimmed = raw.trim();
    let mut end = 0;
    let mut seen_dot = false;
    for (idx, ch) in trimmed.char_indices() {
        let accept = match ch {
            '0'..='9' => true,
            '-' | '+' => idx == 0,
            '.' if !seen_dot => {
                seen_dot = true;
                true
            }
            _ => false,
        };
        if !accept {
            break;
        }
        end = idx + ch.len_utf8();
    }
    trimmed[..end].parse::<f64>().unwrap_or(0.0)
}

/// Columns whose concatenation decides whether a stock record changed.
/// Declaration order is the fingerprint order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockField {
    Cost,
    Freight,
    OrderThreshold,
    Quantity,
    Inactive,
    Custom1,
    Custom2,
    Weighted,
    TareWeight,
    PictureFileName,
    OrderQuantity,
    StaticQuantity,
    Category,
    LongDescription,
    Description,
    Package,
    SupplierId,
    SalesOrderQty,
    LaybyQty,
    Sell,
    PrintComponents,
    Bonus,
    TaxComponents,
    AllowRenaming,
    DepartmentId,
}

impl StockField {
    pub const CHANGEABLE: [StockField; 25] = [
        StockField::Cost,
        StockField::Freight,
        StockField::OrderThreshold,
        StockField::Quantity,
        StockField::Inactive,
        StockField::Custom1,
        StockField::Custom2,
        StockField::Weighted,
        StockField::TareWeight,
        StockField::PictureFileName,
        StockField::OrderQuantity,
        StockField::StaticQuantity,
        StockField::Category,
        StockField::LongDescription,
        StockField::Description,
        StockField::Package,
        StockField::SupplierId,
        StockField::SalesOrderQty,
        StockField::LaybyQty,
        StockField::Sell,
        StockField::PrintComponents,
        StockField::Bonus,
        StockField::TaxComponents,
        StockField::AllowRenaming,
        StockField::DepartmentId,
    ];

    /// Column name in the inventory `Stock` table.
    pub fn column(self) -> &'static str {
        match self {
            StockField::Cost => "cost",
            StockField::Freight => "freight",
            StockField::OrderThreshold => "order_threshold",
            StockField::Quantity => "quantity",
            StockField::Inactive => "inactive",
            StockField::Custom1 => "custom1",
            StockField::Custom2 => "custom2",
            StockField::Weighted => "weighted",
            StockField::TareWeight => "tare_weight",
            StockField::PictureFileName => "picture_file_name",
            StockField::OrderQuantity => "order_quantity",
            StockField::StaticQuantity => "static_quantity",
            StockField::Category => "cat1",
            StockField::LongDescription => "longdesc",
            StockField::Description => "description",
            StockField::Package => "package",
            StockField::SupplierId => "supplier_id",
            StockField::SalesOrderQty => "salesorder_qty",
            StockField::LaybyQty => "layby_qty",
            StockField::Sell => "sell",
            StockField::PrintComponents => "print_components",
            StockField::Bonus => "bonus",
            StockField::TaxComponents => "tax_components",
            StockField::AllowRenaming => "allow_renaming",
            StockField::DepartmentId => "dept_id",
        }
    }
}

const STOCK_ID: &str = "stock_id";
const BARCODE: &str = "Barcode";

/// One row of the inventory `Stock` table keyed by column name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct StockRecord {
    pub fields: BTreeMap<String, FieldValue>,
}

impl StockRecord {
    pub fn new(fields: BTreeMap<String, FieldValue>) -> Self {
        Self { fields }
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column)
    }

    pub fn field(&self, field: StockField) -> Option<&FieldValue> {
        self.get(field.column())
    }

    /// String form of a column; absent columns read as empty.
    pub fn text(&self, column: &str) -> String {
        self.get(column).map(ToString::to_string).unwrap_or_default()
    }

    pub fn set(&mut self, column: &str, value: impl Into<FieldValue>) {
        self.fields.insert(column.to_string(), value.into());
    }

    pub fn stock_id(&self) -> Option<RecordId> {
        self.get(STOCK_ID).map(FieldValue::as_i64)
    }

    /// Public identifier used for SKUs and image file names.
    pub fn barcode(&self) -> String {
        self.text(BARCODE).trim().to_string()
    }

    /// Whether the record is flagged for the web store.
    pub fn published(&self) -> bool {
        self.field(StockField::Custom1)
            .map(|value| value.to_string().trim().eq_ignore_ascii_case("yes"))
            .unwrap_or(false)
    }

    pub fn weight(&self) -> f64 {
        self.field(StockField::Custom2)
            .map(FieldValue::as_f64)
            .unwrap_or(0.0)
    }

    /// Weight if it is usable for shipping.
    pub fn valid_weight(&self) -> Option<f64> {
        let weight = self.weight();
        (weight > MIN_WEIGHT && weight < MAX_WEIGHT).then_some(weight)
    }

    pub fn quantity(&self) -> i64 {
        self.field(StockField::Quantity)
            .map(FieldValue::as_i64)
            .unwrap_or(0)
    }

    pub fn department_id(&self) -> Option<RecordId> {
        self.field(StockField::DepartmentId).map(FieldValue::as_i64)
    }

    pub fn description(&self) -> String {
        self.text(StockField::Description.column())
    }

    pub fn long_description(&self) -> String {
        self.text(StockField::LongDescription.column())
    }

    pub fn sell_price(&self) -> f64 {
        self.field(StockField::Sell)
            .map(FieldValue::as_f64)
            .unwrap_or(0.0)
    }
}

/// Departments and level-one categories as last seen in the inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CategorySnapshot {
    #[serde(default)]
    pub departments: NameMap,
    #[serde(default)]
    pub categories: NameMap,
}

/// Row of the `CategorisedValues` table linking a category to a department.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryAssociation {
    pub department_id: RecordId,
    pub level: i64,
    pub category_id: RecordId,
}

/// Capitalises the first character and lowercases the rest.
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, FieldValue)]) -> StockRecord {
        StockRecord::new(
            pairs
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        )
    }

    #[test]
    fn published_flag_is_case_and_space_insensitive() {
        assert!(record(&[("custom1", " Yes ".into())]).published());
        assert!(record(&[("custom1", "yes".into())]).published());
        assert!(!record(&[("custom1", "no".into())]).published());
        assert!(!record(&[]).published());
    }

    #[test]
    fn weight_parses_leading_number() {
        assert_eq!(record(&[("custom2", "1.5kg".into())]).weight(), 1.5);
        assert_eq!(record(&[("custom2", "heavy".into())]).weight(), 0.0);
        assert_eq!(record(&[("custom2", 2.25.into())]).weight(), 2.25);
    }

    #[test]
    fn valid_weight_is_exclusive_on_both_ends() {
        assert_eq!(record(&[("custom2", "0".into())]).valid_weight(), None);
        assert_eq!(record(&[("custom2", "10".into())]).valid_weight(), None);
        assert_eq!(record(&[("custom2", "12".into())]).valid_weight(), None);
        assert_eq!(record(&[("custom2", "9.9".into())]).valid_weight(), Some(9.9));
    }

    #[test]
    fn quantity_truncates_text_and_float() {
        assert_eq!(record(&[("quantity", "5.0".into())]).quantity(), 5);
        assert_eq!(record(&[("quantity", 3.7.into())]).quantity(), 3);
        assert_eq!(record(&[]).quantity(), 0);
    }

    #[test]
    fn field_values_deserialize_from_yaml_scalars() {
        let yaml = "stock_id: 4\nsell: 12.5\ncustom1: 'yes'\nweighted: false\npackage: ~\n";
        let parsed: StockRecord = serde_yaml::from_str(yaml).expect("record");
        assert_eq!(parsed.stock_id(), Some(4));
        assert_eq!(parsed.get("sell"), Some(&FieldValue::Float(12.5)));
        assert_eq!(parsed.get("weighted"), Some(&FieldValue::Bool(false)));
        assert_eq!(parsed.get("package"), Some(&FieldValue::Null));
        assert!(parsed.published());
    }

    #[test]
    fn capitalize_lowercases_tail() {
        assert_eq!(capitalize("GIFT SETS"), "Gift sets");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn changeable_columns_are_distinct() {
        let mut columns: Vec<_> = StockField::CHANGEABLE.iter().map(|f| f.column()).collect();
        columns.sort_unstable();
        columns.dedup();
        assert_eq!(columns.len(), StockField::CHANGEABLE.len());
    }
}
