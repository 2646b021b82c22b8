// src/models/batch.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use crate::normalize::{lenient_date, parse_lenient_date};

/// Canonical batch record. Dates that were never set, or that the store
/// holds in an unreadable shape, are `None`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Batch {
    pub id: String,
    pub medicine_id: String,
    pub batch_number: String,
    pub quantity: i64,
    pub purchase_price: f64,
    pub sell_price: f64,
    pub manufacturing_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub received_date: Option<DateTime<Utc>>,
    pub supplier_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row as stored. Date columns are read as text and parsed leniently.
#[derive(Debug, sqlx::FromRow)]
pub struct BatchRow {
    pub id: String,
    pub medicine_id: String,
    pub batch_number: String,
    pub quantity: i64,
    pub purchase_price: f64,
    pub sell_price: f64,
    pub manufacturing_date: Option<String>,
    pub expiry_date: Option<String>,
    pub received_date: Option<String>,
    pub supplier_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BatchRow> for Batch {
    fn from(row: BatchRow) -> Self {
        Self {
            id: row.id,
            medicine_id: row.medicine_id,
            batch_number: row.batch_number,
            quantity: row.quantity.max(0),
            purchase_price: row.purchase_price,
            sell_price: row.sell_price,
            manufacturing_date: row.manufacturing_date.as_deref().and_then(parse_lenient_date),
            expiry_date: row.expiry_date.as_deref().and_then(parse_lenient_date),
            received_date: row.received_date.as_deref().and_then(parse_lenient_date),
            supplier_id: row.supplier_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Batch joined with its medicine's display name.
#[derive(Debug, sqlx::FromRow)]
pub struct BatchWithMedicineRow {
    #[sqlx(flatten)]
    pub batch: BatchRow,
    pub medicine_name: String,
}

/// Dates are written as RFC 3339 text so they read back through the same parser.
pub fn date_to_sql(date: Option<DateTime<Utc>>) -> Option<String> {
    date.map(|d| d.to_rfc3339())
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateBatchRequest {
    #[validate(length(min = 1, message = "Medicine ID is required"))]
    pub medicine_id: String,
    #[validate(length(min = 1, max = 100, message = "Batch number must be between 1 and 100 characters"))]
    pub batch_number: String,
    #[validate(range(min = 0, message = "Quantity must be non-negative"))]
    pub quantity: i64,
    #[validate(range(min = 0.0, message = "Purchase price must be non-negative"))]
    pub purchase_price: f64,
    #[validate(range(min = 0.0, message = "Sell price must be non-negative"))]
    pub sell_price: f64,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub manufacturing_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub received_date: Option<DateTime<Utc>>,
    pub supplier_id: Option<String>,
}

/// Partial update: absent fields keep their stored value. A field that is
/// set cannot be cleared back to null through this request.
#[derive(Debug, Deserialize, Validate, Default)]
pub struct UpdateBatchRequest {
    #[validate(length(min = 1, max = 100, message = "Batch number must be between 1 and 100 characters"))]
    pub batch_number: Option<String>,
    #[validate(range(min = 0, message = "Quantity must be non-negative"))]
    pub quantity: Option<i64>,
    #[validate(range(min = 0.0, message = "Purchase price must be non-negative"))]
    pub purchase_price: Option<f64>,
    #[validate(range(min = 0.0, message = "Sell price must be non-negative"))]
    pub sell_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub manufacturing_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub expiry_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_date::deserialize")]
    pub received_date: Option<DateTime<Utc>>,
    pub supplier_id: Option<String>,
}
