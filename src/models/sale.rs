// src/models/sale.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, Utc};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentMethod {
    Cash,
    Card,
    Insurance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SaleStatus {
    Completed,
    Refunded,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Sale {
    pub id: String,
    pub sale_number: String,
    pub date: DateTime<Utc>,
    pub customer_name: Option<String>,
    pub prescription_id: Option<String>,
    pub total: f64,
    pub payment_method: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Medicine and batch identity are copied onto the line so the sale stays
/// readable after either is deleted.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub medicine_id: Option<String>,
    pub medicine_name: String,
    pub batch_id: Option<String>,
    pub batch_number: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub total: f64,
}

#[derive(Debug, Serialize)]
pub struct SaleWithItems {
    #[serde(flatten)]
    pub sale: Sale,
    pub items: Vec<SaleItem>,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct CreateSaleItemRequest {
    #[validate(length(min = 1, message = "Batch ID is required"))]
    pub batch_id: String,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i64,
    /// Falls back to the batch sell price.
    #[validate(range(min = 0.0, message = "Unit price must be non-negative"))]
    pub unit_price: Option<f64>,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateSaleRequest {
    #[validate(length(max = 255, message = "Customer name cannot exceed 255 characters"))]
    pub customer_name: Option<String>,
    #[validate(length(max = 100, message = "Prescription ID cannot exceed 100 characters"))]
    pub prescription_id: Option<String>,
    pub payment_method: PaymentMethod,
    #[validate(length(min = 1, message = "A sale needs at least one item"), nested)]
    pub items: Vec<CreateSaleItemRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSaleRequest {
    #[validate(length(max = 255, message = "Customer name cannot exceed 255 characters"))]
    pub customer_name: Option<String>,
    #[validate(length(max = 100, message = "Prescription ID cannot exceed 100 characters"))]
    pub prescription_id: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub status: Option<SaleStatus>,
}
