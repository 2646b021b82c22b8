// src/normalize.rs
//! Boundary mapping from loosely-shaped inventory records to canonical ones.
//!
//! Records reach the service from older exports and hand-written JSON, with
//! camelCase and snake_case keys mixed, numbers as strings, and MySQL zero
//! dates. Everything is resolved here, once, so the stock analysis only ever
//! sees `Option<DateTime<Utc>>` dates and plain integer quantities.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

use crate::error::MAX_QUANTITY;

pub const DEFAULT_MIN_STOCK: i64 = 10;

const ZERO_DATES: [&str; 3] = ["0000-00-00", "0000-00-00 00:00:00", "0000-00-00T00:00:00"];

/// Parses the date shapes seen in stored and imported records.
/// Empty, zero or unparseable input yields `None`.
pub fn parse_lenient_date(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || ZERO_DATES.contains(&trimmed) {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, format) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Serde helper for request bodies: accepts the same shapes as
/// [`parse_lenient_date`] but rejects non-empty garbage instead of dropping it.
pub mod lenient_date {
    use super::*;
    use serde::de::Error;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => parse_lenient_date(&s)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid date '{}'", s))),
        }
    }
}

fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

fn lenient_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ==================== RAW RECORDS ====================

#[derive(Debug, Default, Deserialize)]
pub struct RawBatchRecord {
    #[serde(default, alias = "batchNumber")]
    pub batch_number: Option<Value>,
    #[serde(default)]
    pub quantity: Option<Value>,
    #[serde(default, alias = "purchasePrice")]
    pub purchase_price: Option<Value>,
    #[serde(default, alias = "sellPrice")]
    pub sell_price: Option<Value>,
    #[serde(default, alias = "manufacturingDate")]
    pub manufacturing_date: Option<String>,
    #[serde(default, alias = "expiryDate")]
    pub expiry_date: Option<String>,
    #[serde(default, alias = "receivedDate")]
    pub received_date: Option<String>,
    #[serde(default, alias = "supplierId")]
    pub supplier_id: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawMedicineRecord {
    #[serde(default, alias = "medicine_name", alias = "medicineName")]
    pub name: Option<String>,
    #[serde(default, alias = "genericName")]
    pub generic_name: Option<String>,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, alias = "minStock")]
    pub min_stock: Option<Value>,
    #[serde(default)]
    pub batches: Vec<RawBatchRecord>,
}

// ==================== CANONICAL RECORDS ====================

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRecord {
    pub batch_number: String,
    pub quantity: i64,
    pub purchase_price: f64,
    pub sell_price: f64,
    pub manufacturing_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub received_date: Option<DateTime<Utc>>,
    pub supplier_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MedicineRecord {
    pub name: String,
    pub generic_name: Option<String>,
    pub dosage: Option<String>,
    pub form: Option<String>,
    pub category: Option<String>,
    pub min_stock: i64,
    pub batches: Vec<BatchRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeError {
    MissingField(&'static str),
    NegativeValue { field: &'static str, value: String },
    TooLarge { field: &'static str, value: String },
    InvalidBatch { index: usize, reason: Box<NormalizeError> },
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NormalizeError::MissingField(field) => write!(f, "{} is required", field),
            NormalizeError::NegativeValue { field, value } => {
                write!(f, "{} cannot be negative (got {})", field, value)
            }
            NormalizeError::TooLarge { field, value } => {
                write!(f, "{} exceeds {} (got {})", field, MAX_QUANTITY, value)
            }
            NormalizeError::InvalidBatch { index, reason } => {
                write!(f, "batch {}: {}", index + 1, reason)
            }
        }
    }
}

impl std::error::Error for NormalizeError {}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn price(value: Option<&Value>, field: &'static str) -> Result<f64, NormalizeError> {
    let parsed = value.and_then(lenient_f64).unwrap_or(0.0);
    if parsed < 0.0 {
        return Err(NormalizeError::NegativeValue { field, value: parsed.to_string() });
    }
    Ok(parsed)
}

impl TryFrom<RawBatchRecord> for BatchRecord {
    type Error = NormalizeError;

    fn try_from(raw: RawBatchRecord) -> Result<Self, Self::Error> {
        let batch_number = raw
            .batch_number
            .as_ref()
            .and_then(lenient_string)
            .ok_or(NormalizeError::MissingField("batch_number"))?;

        // Absent or non-numeric quantity counts as empty stock.
        let quantity = raw.quantity.as_ref().and_then(lenient_i64).unwrap_or(0);
        if quantity < 0 {
            return Err(NormalizeError::NegativeValue {
                field: "quantity",
                value: quantity.to_string(),
            });
        }
        if quantity > MAX_QUANTITY {
            return Err(NormalizeError::TooLarge {
                field: "quantity",
                value: quantity.to_string(),
            });
        }

        Ok(Self {
            batch_number,
            quantity,
            purchase_price: price(raw.purchase_price.as_ref(), "purchase_price")?,
            sell_price: price(raw.sell_price.as_ref(), "sell_price")?,
            manufacturing_date: raw.manufacturing_date.as_deref().and_then(parse_lenient_date),
            expiry_date: raw.expiry_date.as_deref().and_then(parse_lenient_date),
            received_date: raw.received_date.as_deref().and_then(parse_lenient_date),
            supplier_id: raw.supplier_id.as_ref().and_then(lenient_string),
        })
    }
}

impl TryFrom<RawMedicineRecord> for MedicineRecord {
    type Error = NormalizeError;

    fn try_from(raw: RawMedicineRecord) -> Result<Self, Self::Error> {
        let name = non_empty(raw.name).ok_or(NormalizeError::MissingField("name"))?;

        let min_stock = raw
            .min_stock
            .as_ref()
            .and_then(lenient_i64)
            .unwrap_or(DEFAULT_MIN_STOCK);
        if min_stock < 0 {
            return Err(NormalizeError::NegativeValue {
                field: "min_stock",
                value: min_stock.to_string(),
            });
        }

        let batches = raw
            .batches
            .into_iter()
            .enumerate()
            .map(|(index, b)| {
                BatchRecord::try_from(b).map_err(|reason| NormalizeError::InvalidBatch {
                    index,
                    reason: Box::new(reason),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name,
            generic_name: non_empty(raw.generic_name),
            dosage: non_empty(raw.dosage),
            form: non_empty(raw.form),
            category: non_empty(raw.category),
            min_stock,
            batches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use serde_json::json;

    #[test]
    fn test_parse_lenient_date_formats() {
        let rfc = parse_lenient_date("2026-03-01T10:00:00Z").unwrap();
        assert_eq!(rfc.day(), 1);

        let offset = parse_lenient_date("2026-03-01T10:00:00+02:00").unwrap();
        assert_eq!(offset.to_rfc3339(), "2026-03-01T08:00:00+00:00");

        let mysql = parse_lenient_date("2026-03-01 10:00:00").unwrap();
        assert_eq!(mysql, rfc);

        let date_only = parse_lenient_date("2026-03-01").unwrap();
        assert_eq!(date_only.to_rfc3339(), "2026-03-01T00:00:00+00:00");
    }

    #[test]
    fn test_parse_lenient_date_rejects_junk() {
        assert_eq!(parse_lenient_date(""), None);
        assert_eq!(parse_lenient_date("   "), None);
        assert_eq!(parse_lenient_date("0000-00-00"), None);
        assert_eq!(parse_lenient_date("0000-00-00 00:00:00"), None);
        assert_eq!(parse_lenient_date("next tuesday"), None);
        assert_eq!(parse_lenient_date("2026-13-45"), None);
    }

    #[test]
    fn test_aliases_resolve_to_one_record() {
        let camel: RawMedicineRecord = serde_json::from_value(json!({
            "name": "Paracetamol",
            "genericName": "Acetaminophen",
            "minStock": 50,
            "batches": [{
                "batchNumber": "PCM-01",
                "quantity": "30",
                "purchasePrice": 1.2,
                "sellPrice": "2.5",
                "expiryDate": "2027-01-31",
                "supplierId": 4
            }]
        }))
        .unwrap();

        let snake: RawMedicineRecord = serde_json::from_value(json!({
            "medicine_name": "Paracetamol",
            "generic_name": "Acetaminophen",
            "min_stock": "50",
            "batches": [{
                "batch_number": "PCM-01",
                "quantity": 30,
                "purchase_price": "1.2",
                "sell_price": 2.5,
                "expiry_date": "2027-01-31 00:00:00",
                "supplier_id": "4"
            }]
        }))
        .unwrap();

        let camel = MedicineRecord::try_from(camel).unwrap();
        let snake = MedicineRecord::try_from(snake).unwrap();
        assert_eq!(camel, snake);
        assert_eq!(camel.min_stock, 50);
        assert_eq!(camel.batches[0].quantity, 30);
        assert_eq!(camel.batches[0].sell_price, 2.5);
        assert_eq!(camel.batches[0].supplier_id.as_deref(), Some("4"));
    }

    #[test]
    fn test_defaults_for_missing_fields() {
        let raw: RawMedicineRecord = serde_json::from_value(json!({
            "name": "Ibuprofen",
            "batches": [{ "batchNumber": "IBU-7", "expiryDate": "0000-00-00" }]
        }))
        .unwrap();

        let record = MedicineRecord::try_from(raw).unwrap();
        assert_eq!(record.min_stock, DEFAULT_MIN_STOCK);
        assert_eq!(record.batches[0].quantity, 0);
        assert_eq!(record.batches[0].expiry_date, None);
        assert_eq!(record.batches[0].sell_price, 0.0);
    }

    #[test]
    fn test_zero_min_stock_is_kept() {
        let raw: RawMedicineRecord =
            serde_json::from_value(json!({ "name": "Saline", "minStock": 0 })).unwrap();
        assert_eq!(MedicineRecord::try_from(raw).unwrap().min_stock, 0);
    }

    #[test]
    fn test_rejections() {
        let nameless: RawMedicineRecord = serde_json::from_value(json!({ "name": "  " })).unwrap();
        assert_eq!(
            MedicineRecord::try_from(nameless),
            Err(NormalizeError::MissingField("name"))
        );

        let negative: RawMedicineRecord = serde_json::from_value(json!({
            "name": "Amoxicillin",
            "batches": [{ "batchNumber": "A1", "quantity": 5 }, { "batchNumber": "A2", "quantity": -3 }]
        }))
        .unwrap();
        let err = MedicineRecord::try_from(negative).unwrap_err();
        assert_eq!(err.to_string(), "batch 2: quantity cannot be negative (got -3)");
    }

    #[test]
    fn test_oversized_quantity_rejected() {
        let raw: RawMedicineRecord = serde_json::from_value(json!({
            "name": "Amoxicillin",
            "batches": [{ "batchNumber": "A1", "quantity": i64::MAX }]
        }))
        .unwrap();
        let err = MedicineRecord::try_from(raw).unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::InvalidBatch { index: 0, ref reason }
                if matches!(**reason, NormalizeError::TooLarge { field: "quantity", .. })
        ));

        let at_cap: RawMedicineRecord = serde_json::from_value(json!({
            "name": "Amoxicillin",
            "batches": [{ "batchNumber": "A1", "quantity": MAX_QUANTITY }]
        }))
        .unwrap();
        assert_eq!(MedicineRecord::try_from(at_cap).unwrap().batches[0].quantity, MAX_QUANTITY);
    }

    #[test]
    fn test_lenient_date_deserializer() {
        #[derive(Deserialize)]
        struct Body {
            #[serde(default, deserialize_with = "lenient_date::deserialize")]
            expiry_date: Option<DateTime<Utc>>,
        }

        let body: Body = serde_json::from_value(json!({ "expiry_date": "2027-06-30" })).unwrap();
        assert!(body.expiry_date.is_some());

        let body: Body = serde_json::from_value(json!({})).unwrap();
        assert!(body.expiry_date.is_none());

        assert!(serde_json::from_value::<Body>(json!({ "expiry_date": "soon" })).is_err());
    }
}
