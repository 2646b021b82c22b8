// src/batch_handlers.rs
//! Stock batches: CRUD and the expiry alert view.

use actix_web::{web, HttpResponse};
use std::sync::Arc;
use crate::AppState;
use crate::analyzer::{build_expiry_alert_list, classify_batch_expiry, days_until_expiry, ExpiryClass};
use crate::error::{ApiError, ApiResult, validate_price, validate_quantity};
use crate::handlers::{fetch_page, normalize_page, ApiResponse, ReferenceTimeQuery};
use crate::models::*;
use crate::query_builders::{FieldWhitelist, SafeQueryBuilder};
use crate::validator::{BusinessValidator, CustomValidate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

// ==================== RESPONSE STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    #[serde(flatten)]
    pub batch: Batch,
    pub medicine_name: String,
    pub classification: ExpiryClass,
    pub days_until_expiry: Option<i64>,
}

impl BatchResponse {
    fn new(batch: Batch, medicine_name: String, now: DateTime<Utc>) -> Self {
        let classification = classify_batch_expiry(&batch, now);
        let days_until_expiry = batch.expiry_date.map(|d| days_until_expiry(d, now));
        Self { batch, medicine_name, classification, days_until_expiry }
    }
}

// ==================== BATCH QUERY ====================

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub medicine_id: Option<String>,
    pub supplier_id: Option<String>,
}

const BATCH_JOIN: &str = "batches b JOIN medicines m ON b.medicine_id = m.id";
const BATCH_COLUMNS: &str = "b.*, m.name AS medicine_name";

async fn fetch_batch(pool: &SqlitePool, batch_id: &str) -> ApiResult<BatchWithMedicineRow> {
    let sql = format!("SELECT {} FROM {} WHERE b.id = ?", BATCH_COLUMNS, BATCH_JOIN);
    sqlx::query_as::<_, BatchWithMedicineRow>(&sql)
        .bind(batch_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::batch_not_found(batch_id))
}

async fn ensure_supplier_exists(pool: &SqlitePool, supplier_id: &str) -> ApiResult<()> {
    let found: Option<(String,)> = sqlx::query_as("SELECT id FROM suppliers WHERE id = ?")
        .bind(supplier_id)
        .fetch_optional(pool)
        .await?;
    found.map(|_| ()).ok_or_else(|| ApiError::supplier_not_found(supplier_id))
}

// ==================== BATCH CRUD ====================

pub async fn get_batches(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<BatchQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = normalize_page(query.page, query.per_page);
    let whitelist = FieldWhitelist::for_batches();

    let mut builder = SafeQueryBuilder::new(BATCH_COLUMNS, BATCH_JOIN, &whitelist);
    if let Some(ref search) = query.search {
        builder.add_search(&["b.batch_number", "m.name"], search);
    }
    if let Some(ref medicine_id) = query.medicine_id {
        builder.add_exact_match("b.medicine_id", medicine_id.as_str());
    }
    if let Some(ref supplier_id) = query.supplier_id {
        builder.add_exact_match("b.supplier_id", supplier_id.as_str());
    }
    builder
        .order_by("m.name", "ASC")
        .order_by("b.expiry_date", "ASC")
        .paginate(per_page, offset);

    let rows = fetch_page::<BatchWithMedicineRow>(&app_state.db_pool, &builder, page, per_page).await?;
    let now = Utc::now();
    let response = rows.map(|row| BatchResponse::new(Batch::from(row.batch), row.medicine_name, now));

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub async fn get_batch(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let batch_id = path.into_inner();
    let row = fetch_batch(&app_state.db_pool, &batch_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(BatchResponse::new(
        Batch::from(row.batch),
        row.medicine_name,
        Utc::now(),
    ))))
}

pub async fn create_batch(
    app_state: web::Data<Arc<AppState>>,
    batch: web::Json<CreateBatchRequest>,
) -> ApiResult<HttpResponse> {
    batch.validate()?;
    batch.custom_validate().into_result()?;
    validate_quantity(batch.quantity)?;
    validate_price("purchase_price", batch.purchase_price)?;
    validate_price("sell_price", batch.sell_price)?;

    let medicine: Option<(String,)> = sqlx::query_as("SELECT id FROM medicines WHERE id = ?")
        .bind(&batch.medicine_id)
        .fetch_optional(&app_state.db_pool)
        .await?;
    if medicine.is_none() {
        return Err(ApiError::medicine_not_found(&batch.medicine_id));
    }

    if let Some(ref supplier_id) = batch.supplier_id {
        ensure_supplier_exists(&app_state.db_pool, supplier_id).await?;
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let batch_number = batch.batch_number.trim();

    sqlx::query(
        r#"INSERT INTO batches (id, medicine_id, batch_number, quantity, purchase_price, sell_price,
                               manufacturing_date, expiry_date, received_date, supplier_id, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(&id)
        .bind(&batch.medicine_id)
        .bind(batch_number)
        .bind(batch.quantity)
        .bind(batch.purchase_price)
        .bind(batch.sell_price)
        .bind(date_to_sql(batch.manufacturing_date))
        .bind(date_to_sql(batch.expiry_date))
        .bind(date_to_sql(batch.received_date.or(Some(now))))
        .bind(&batch.supplier_id)
        .bind(now)
        .bind(now)
        .execute(&app_state.db_pool)
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => ApiError::Conflict(format!(
                "Batch '{}' already exists for this medicine",
                batch_number
            )),
            other => other,
        })?;

    let row = fetch_batch(&app_state.db_pool, &id).await?;
    log::info!(
        "Batch {} received for {}: {} units",
        batch_number, row.medicine_name, batch.quantity
    );

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        BatchResponse::new(Batch::from(row.batch), row.medicine_name, now),
        "Batch created successfully".to_string(),
    )))
}

pub async fn update_batch(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    update: web::Json<UpdateBatchRequest>,
) -> ApiResult<HttpResponse> {
    let batch_id = path.into_inner();
    update.validate()?;

    if let Some(quantity) = update.quantity {
        validate_quantity(quantity)?;
    }
    if let Some(price) = update.purchase_price {
        validate_price("purchase_price", price)?;
    }
    if let Some(price) = update.sell_price {
        validate_price("sell_price", price)?;
    }

    let existing = Batch::from(fetch_batch(&app_state.db_pool, &batch_id).await?.batch);
    BusinessValidator::validate_batch_update(&existing, &update).into_result()?;

    if let Some(ref supplier_id) = update.supplier_id {
        ensure_supplier_exists(&app_state.db_pool, supplier_id).await?;
    }

    if let Some(quantity) = update.quantity {
        if quantity != existing.quantity {
            log::info!(
                "Stock correction on batch {}: {} -> {}",
                existing.batch_number, existing.quantity, quantity
            );
        }
    }

    sqlx::query(
        r#"UPDATE batches SET
            batch_number = COALESCE(?, batch_number),
            quantity = COALESCE(?, quantity),
            purchase_price = COALESCE(?, purchase_price),
            sell_price = COALESCE(?, sell_price),
            manufacturing_date = COALESCE(?, manufacturing_date),
            expiry_date = COALESCE(?, expiry_date),
            received_date = COALESCE(?, received_date),
            supplier_id = COALESCE(?, supplier_id),
            updated_at = ?
           WHERE id = ?"#
    )
        .bind(update.batch_number.as_deref().map(str::trim))
        .bind(update.quantity)
        .bind(update.purchase_price)
        .bind(update.sell_price)
        .bind(date_to_sql(update.manufacturing_date))
        .bind(date_to_sql(update.expiry_date))
        .bind(date_to_sql(update.received_date))
        .bind(&update.supplier_id)
        .bind(Utc::now())
        .bind(&batch_id)
        .execute(&app_state.db_pool)
        .await?;

    let row = fetch_batch(&app_state.db_pool, &batch_id).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        BatchResponse::new(Batch::from(row.batch), row.medicine_name, Utc::now()),
        "Batch updated successfully".to_string(),
    )))
}

pub async fn delete_batch(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let batch_id = path.into_inner();

    let result = sqlx::query("DELETE FROM batches WHERE id = ?")
        .bind(&batch_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::batch_not_found(&batch_id));
    }

    log::info!("Batch {} deleted", batch_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message(
        (),
        "Batch deleted successfully".to_string(),
    )))
}

// ==================== EXPIRY ALERTS ====================

pub async fn get_expiring_batches(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ReferenceTimeQuery>,
) -> ApiResult<HttpResponse> {
    let now = query.reference_time()?;
    let snapshot = app_state.inventory.load_snapshot().await?;
    let alerts = build_expiry_alert_list(&snapshot, now);

    Ok(HttpResponse::Ok().json(ApiResponse::success(alerts)))
}
