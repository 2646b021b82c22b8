// src/models/order.rs
use serde::{Deserialize, Serialize};
use validator::Validate;
use chrono::{DateTime, NaiveDate, Utc};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct SupplierOrder {
    pub id: String,
    pub order_number: String,
    pub supplier_id: Option<String>,
    pub supplier_name: String,
    pub date: NaiveDate,
    pub expected_delivery: Option<NaiveDate>,
    pub status: String,
    pub total: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub medicine_id: Option<String>,
    pub medicine_name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub total: f64,
}

#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: SupplierOrder,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct CreateOrderItemRequest {
    #[validate(length(min = 1, message = "Medicine ID is required"))]
    pub medicine_id: String,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i64,
    #[validate(range(min = 0.0, message = "Unit price must be non-negative"))]
    pub unit_price: f64,
}

#[derive(Debug, Deserialize, Validate, Clone)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Supplier ID is required"))]
    pub supplier_id: String,
    pub expected_delivery: Option<NaiveDate>,
    #[validate(length(min = 1, message = "An order needs at least one item"), nested)]
    pub items: Vec<CreateOrderItemRequest>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateOrderRequest {
    pub status: Option<OrderStatus>,
    pub expected_delivery: Option<NaiveDate>,
}
