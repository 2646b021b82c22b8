// src/models/mod.rs

pub mod batch;
pub mod medicine;
pub mod order;
pub mod sale;
pub mod supplier;

// Re-export so entities are reachable as crate::models::StructName
pub use batch::*;
pub use medicine::*;
pub use order::*;
pub use sale::*;
pub use supplier::*;

use serde::Serialize;

// ==================== COMMON / SHARED ====================

/// Headline numbers for the dashboard
#[derive(Debug, Serialize, PartialEq)]
pub struct DashboardStats {
    pub total_medicines: i64,
    pub total_batches: i64,
    pub total_stock: i64,
    pub low_stock_medicines: i64,
    pub expired_batches: i64,
    pub expiring_soon_batches: i64,
    pub total_sales: i64,
    pub today_sales_amount: f64,
    pub pending_orders: i64,
}
