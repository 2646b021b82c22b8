// src/medicine_handlers.rs
//! Medicine catalogue: CRUD, low-stock view and bulk import.

use actix_web::{web, HttpResponse};
use std::collections::HashMap;
use std::sync::Arc;
use crate::AppState;
use crate::analyzer::{build_low_stock_list, total_stock, MedicineStock};
use crate::error::{ApiError, ApiResult};
use crate::handlers::{fetch_page, ApiResponse, PaginationQuery};
use crate::models::*;
use crate::normalize::{MedicineRecord, RawMedicineRecord, DEFAULT_MIN_STOCK};
use crate::query_builders::{FieldWhitelist, SafeQueryBuilder};
use crate::validator::CustomValidate;
use chrono::Utc;
use serde::Serialize;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;
use validator::Validate;

/// Medicine as returned by the API: its batches plus the derived stock figures.
#[derive(Debug, Serialize)]
pub struct MedicineResponse {
    #[serde(flatten)]
    pub medicine: MedicineWithBatches,
    pub total_stock: i64,
    pub low_stock: bool,
}

impl From<MedicineWithBatches> for MedicineResponse {
    fn from(medicine: MedicineWithBatches) -> Self {
        let total_stock = total_stock(&medicine);
        let low_stock = total_stock < medicine.medicine.min_stock;
        Self { medicine, total_stock, low_stock }
    }
}

// ==================== MEDICINE CRUD ====================

pub async fn get_medicines(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = query.normalize();
    let whitelist = FieldWhitelist::for_medicines();

    let mut builder = SafeQueryBuilder::new("*", "medicines", &whitelist);
    if let Some(ref search) = query.search {
        builder.add_search(&["name", "generic_name", "category"], search);
    }
    if let Some(ref category) = query.category {
        builder.add_exact_match("category", category.as_str());
    }
    builder
        .order_by(
            query.sort_by.as_deref().unwrap_or("name"),
            query.sort_order.as_deref().unwrap_or("ASC"),
        )
        .paginate(per_page, offset);

    let medicines = fetch_page::<Medicine>(&app_state.db_pool, &builder, page, per_page).await?;

    let mut batches = load_batches_for(&app_state.db_pool, &medicines.data).await?;
    let response = medicines.map(|medicine| {
        let batches = batches.remove(&medicine.id).unwrap_or_default();
        MedicineResponse::from(MedicineWithBatches { medicine, batches })
    });

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

async fn load_batches_for(
    pool: &sqlx::SqlitePool,
    medicines: &[Medicine],
) -> ApiResult<HashMap<String, Vec<Batch>>> {
    let mut grouped: HashMap<String, Vec<Batch>> = HashMap::new();
    if medicines.is_empty() {
        return Ok(grouped);
    }

    let placeholders = medicines.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!(
        "SELECT * FROM batches WHERE medicine_id IN ({}) ORDER BY expiry_date IS NULL, expiry_date ASC",
        placeholders
    );
    let mut query = sqlx::query_as::<_, BatchRow>(&sql);
    for medicine in medicines {
        query = query.bind(&medicine.id);
    }

    for row in query.fetch_all(pool).await? {
        let batch = Batch::from(row);
        grouped.entry(batch.medicine_id.clone()).or_default().push(batch);
    }
    Ok(grouped)
}

pub async fn get_medicine(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let medicine_id = path.into_inner();

    let medicine = app_state
        .inventory
        .find_medicine(&medicine_id)
        .await?
        .ok_or_else(|| ApiError::medicine_not_found(&medicine_id))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(MedicineResponse::from(medicine))))
}

pub async fn create_medicine(
    app_state: web::Data<Arc<AppState>>,
    medicine: web::Json<CreateMedicineRequest>,
) -> ApiResult<HttpResponse> {
    medicine.validate()?;

    let name = medicine.name.trim();
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM medicines WHERE name = ?")
        .bind(name)
        .fetch_optional(&app_state.db_pool)
        .await?;
    if existing.is_some() {
        return Err(ApiError::medicine_already_exists(name));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"INSERT INTO medicines (id, name, generic_name, dosage, form, category, min_stock, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(&id)
        .bind(name)
        .bind(&medicine.generic_name)
        .bind(&medicine.dosage)
        .bind(&medicine.form)
        .bind(&medicine.category)
        .bind(medicine.min_stock.unwrap_or(DEFAULT_MIN_STOCK))
        .bind(now)
        .bind(now)
        .execute(&app_state.db_pool)
        .await?;

    let created: Medicine = sqlx::query_as("SELECT * FROM medicines WHERE id = ?")
        .bind(&id)
        .fetch_one(&app_state.db_pool)
        .await?;

    log::info!("Medicine created: {} ({})", created.name, id);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        created,
        "Medicine created successfully".to_string(),
    )))
}

pub async fn update_medicine(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    update: web::Json<UpdateMedicineRequest>,
) -> ApiResult<HttpResponse> {
    let medicine_id = path.into_inner();
    update.validate()?;

    let result = sqlx::query(
        r#"UPDATE medicines SET
            name = COALESCE(?, name),
            generic_name = COALESCE(?, generic_name),
            dosage = COALESCE(?, dosage),
            form = COALESCE(?, form),
            category = COALESCE(?, category),
            min_stock = COALESCE(?, min_stock),
            updated_at = ?
           WHERE id = ?"#
    )
        .bind(update.name.as_deref().map(str::trim))
        .bind(&update.generic_name)
        .bind(&update.dosage)
        .bind(&update.form)
        .bind(&update.category)
        .bind(update.min_stock)
        .bind(Utc::now())
        .bind(&medicine_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::medicine_not_found(&medicine_id));
    }

    let updated: Medicine = sqlx::query_as("SELECT * FROM medicines WHERE id = ?")
        .bind(&medicine_id)
        .fetch_one(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        updated,
        "Medicine updated successfully".to_string(),
    )))
}

pub async fn delete_medicine(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let medicine_id = path.into_inner();
    let mut tx = app_state.db_pool.begin().await?;

    let batch_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM batches WHERE medicine_id = ?")
        .bind(&medicine_id)
        .fetch_one(&mut *tx)
        .await?;

    let result = sqlx::query("DELETE FROM medicines WHERE id = ?")
        .bind(&medicine_id)
        .execute(&mut *tx)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::medicine_not_found(&medicine_id));
    }

    tx.commit().await?;

    log::info!("Medicine {} deleted with {} batches", medicine_id, batch_count.0);

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        serde_json::json!({ "id": medicine_id, "deleted_batches": batch_count.0 }),
        "Medicine deleted successfully".to_string(),
    )))
}

// ==================== LOW STOCK ====================

pub async fn get_low_stock_medicines(
    app_state: web::Data<Arc<AppState>>,
) -> ApiResult<HttpResponse> {
    let snapshot = app_state.inventory.load_snapshot().await?;
    let low_stock: Vec<MedicineStock> = build_low_stock_list(&snapshot)
        .into_iter()
        .map(MedicineStock::from)
        .collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(low_stock)))
}

// ==================== IMPORT ====================

/// Imports medicines with embedded batches. Each record commits on its own;
/// a bad record is reported and skipped without affecting the others.
pub async fn import_medicines(
    app_state: web::Data<Arc<AppState>>,
    records: web::Json<Vec<serde_json::Value>>,
) -> ApiResult<HttpResponse> {
    let records = records.into_inner();
    let total = records.len();
    let mut imported = 0usize;
    let mut imported_batches = 0usize;
    let mut errors: Vec<String> = Vec::new();

    for (index, value) in records.into_iter().enumerate() {
        let row = index + 1;

        let record = match parse_import_record(value) {
            Ok(record) => record,
            Err(e) => {
                errors.push(format!("Row {}: {}", row, e));
                continue;
            }
        };

        let mut tx = app_state.db_pool.begin().await?;
        match import_record(&mut tx, &record).await {
            Ok(batch_count) => {
                tx.commit().await?;
                imported += 1;
                imported_batches += batch_count;
            }
            Err(e) => {
                tx.rollback().await?;
                errors.push(format!("Row {}: {}", row, e));
            }
        }
    }

    log::info!(
        "Medicine import: {}/{} records, {} batches, {} errors",
        imported, total, imported_batches, errors.len()
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "imported": imported,
        "imported_batches": imported_batches,
        "skipped": total - imported,
        "total": total,
        "errors": errors
    }))))
}

fn parse_import_record(value: serde_json::Value) -> Result<MedicineRecord, String> {
    let raw: RawMedicineRecord = serde_json::from_value(value).map_err(|e| e.to_string())?;
    let record = MedicineRecord::try_from(raw).map_err(|e| e.to_string())?;

    for (index, batch) in record.batches.iter().enumerate() {
        let result = batch.custom_validate();
        if !result.is_valid() {
            return Err(format!("batch {}: {}", index + 1, result.error_message()));
        }
    }

    Ok(record)
}

/// Reuses an existing medicine with the same name, otherwise creates it.
async fn import_record(tx: &mut Transaction<'_, Sqlite>, record: &MedicineRecord) -> ApiResult<usize> {
    let now = Utc::now();

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM medicines WHERE name = ?")
        .bind(&record.name)
        .fetch_optional(&mut **tx)
        .await?;

    let medicine_id = match existing {
        Some((id,)) => id,
        None => {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"INSERT INTO medicines (id, name, generic_name, dosage, form, category, min_stock, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#
            )
                .bind(&id)
                .bind(&record.name)
                .bind(&record.generic_name)
                .bind(&record.dosage)
                .bind(&record.form)
                .bind(&record.category)
                .bind(record.min_stock)
                .bind(now)
                .bind(now)
                .execute(&mut **tx)
                .await?;
            id
        }
    };

    for batch in &record.batches {
        if let Some(ref supplier_id) = batch.supplier_id {
            let supplier: Option<(String,)> = sqlx::query_as("SELECT id FROM suppliers WHERE id = ?")
                .bind(supplier_id)
                .fetch_optional(&mut **tx)
                .await?;
            if supplier.is_none() {
                return Err(ApiError::supplier_not_found(supplier_id));
            }
        }

        sqlx::query(
            r#"INSERT INTO batches (id, medicine_id, batch_number, quantity, purchase_price, sell_price,
                                   manufacturing_date, expiry_date, received_date, supplier_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        )
            .bind(Uuid::new_v4().to_string())
            .bind(&medicine_id)
            .bind(&batch.batch_number)
            .bind(batch.quantity)
            .bind(batch.purchase_price)
            .bind(batch.sell_price)
            .bind(date_to_sql(batch.manufacturing_date))
            .bind(date_to_sql(batch.expiry_date))
            .bind(date_to_sql(batch.received_date.or(Some(now))))
            .bind(&batch.supplier_id)
            .bind(now)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(|e| match ApiError::from(e) {
                ApiError::Conflict(_) => ApiError::Conflict(format!(
                    "batch '{}' already exists for '{}'",
                    batch.batch_number, record.name
                )),
                other => other,
            })?;
    }

    Ok(record.batches.len())
}
