// src/repositories/mod.rs
//! Read/write access to the inventory aggregate.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::{ApiError, ApiResult};
use crate::models::{Batch, BatchRow, Medicine, MedicineWithBatches};

/// Source of inventory snapshots for the analyzer, plus the single stock
/// mutation that must never drive a batch below zero.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Every medicine with all of its batches, medicines ordered by name.
    async fn load_snapshot(&self) -> ApiResult<Vec<MedicineWithBatches>>;

    async fn find_medicine(&self, id: &str) -> ApiResult<Option<MedicineWithBatches>>;

    /// Removes `quantity` units from a batch inside the caller's transaction.
    /// Fails with `InsufficientStock` and leaves the row untouched when the
    /// batch holds fewer units.
    async fn take_stock(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        batch: &Batch,
        quantity: i64,
    ) -> ApiResult<()>;
}

pub struct SqliteInventoryStore {
    pool: SqlitePool,
}

impl SqliteInventoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const BATCH_ORDER: &str = "ORDER BY expiry_date IS NULL, expiry_date ASC, batch_number ASC";

#[async_trait]
impl InventoryStore for SqliteInventoryStore {
    async fn load_snapshot(&self) -> ApiResult<Vec<MedicineWithBatches>> {
        let medicines: Vec<Medicine> = sqlx::query_as("SELECT * FROM medicines ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;

        let rows: Vec<BatchRow> = sqlx::query_as(&format!("SELECT * FROM batches {}", BATCH_ORDER))
            .fetch_all(&self.pool)
            .await?;

        let mut by_medicine: HashMap<String, Vec<Batch>> = HashMap::new();
        for row in rows {
            let batch = Batch::from(row);
            by_medicine.entry(batch.medicine_id.clone()).or_default().push(batch);
        }

        Ok(medicines
            .into_iter()
            .map(|medicine| {
                let batches = by_medicine.remove(&medicine.id).unwrap_or_default();
                MedicineWithBatches { medicine, batches }
            })
            .collect())
    }

    async fn find_medicine(&self, id: &str) -> ApiResult<Option<MedicineWithBatches>> {
        let medicine: Option<Medicine> = sqlx::query_as("SELECT * FROM medicines WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(medicine) = medicine else {
            return Ok(None);
        };

        let rows: Vec<BatchRow> = sqlx::query_as(&format!(
            "SELECT * FROM batches WHERE medicine_id = ? {}",
            BATCH_ORDER
        ))
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        Ok(Some(MedicineWithBatches {
            medicine,
            batches: rows.into_iter().map(Batch::from).collect(),
        }))
    }

    async fn take_stock(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        batch: &Batch,
        quantity: i64,
    ) -> ApiResult<()> {
        if quantity <= 0 {
            return Err(ApiError::ValidationError("Quantity must be at least 1".to_string()));
        }

        let result = sqlx::query(
            "UPDATE batches SET quantity = quantity - ?, updated_at = ? WHERE id = ? AND quantity >= ?",
        )
            .bind(quantity)
            .bind(chrono::Utc::now())
            .bind(&batch.id)
            .bind(quantity)
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ApiError::insufficient_stock(&batch.batch_number, quantity));
        }

        Ok(())
    }
}
