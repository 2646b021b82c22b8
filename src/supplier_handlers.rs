// src/supplier_handlers.rs
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{fetch_page, ApiResponse, PaginationQuery};
use crate::models::*;
use crate::query_builders::{FieldWhitelist, SafeQueryBuilder};
use crate::validator::CustomValidate;
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

pub async fn get_suppliers(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = query.normalize();
    let whitelist = FieldWhitelist::for_suppliers();

    let mut builder = SafeQueryBuilder::new("*", "suppliers", &whitelist);
    if let Some(ref search) = query.search {
        builder.add_search(&["name", "contact", "email"], search);
    }
    builder.order_by("name", "ASC").paginate(per_page, offset);

    let suppliers = fetch_page::<Supplier>(&app_state.db_pool, &builder, page, per_page).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(suppliers)))
}

pub async fn get_supplier(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let supplier_id = path.into_inner();

    let supplier: Supplier = sqlx::query_as("SELECT * FROM suppliers WHERE id = ?")
        .bind(&supplier_id)
        .fetch_optional(&app_state.db_pool)
        .await?
        .ok_or_else(|| ApiError::supplier_not_found(&supplier_id))?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(supplier)))
}

pub async fn create_supplier(
    app_state: web::Data<Arc<AppState>>,
    supplier: web::Json<CreateSupplierRequest>,
) -> ApiResult<HttpResponse> {
    supplier.validate()?;
    supplier.custom_validate().into_result()?;

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"INSERT INTO suppliers (id, name, contact, phone, email, address, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(&id)
        .bind(supplier.name.trim())
        .bind(&supplier.contact)
        .bind(&supplier.phone)
        .bind(&supplier.email)
        .bind(&supplier.address)
        .bind(now)
        .bind(now)
        .execute(&app_state.db_pool)
        .await?;

    let created: Supplier = sqlx::query_as("SELECT * FROM suppliers WHERE id = ?")
        .bind(&id)
        .fetch_one(&app_state.db_pool)
        .await?;

    log::info!("Supplier created: {} ({})", created.name, id);

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        created,
        "Supplier created successfully".to_string(),
    )))
}

pub async fn update_supplier(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    update: web::Json<UpdateSupplierRequest>,
) -> ApiResult<HttpResponse> {
    let supplier_id = path.into_inner();
    update.validate()?;
    update.custom_validate().into_result()?;

    let result = sqlx::query(
        r#"UPDATE suppliers SET
            name = COALESCE(?, name),
            contact = COALESCE(?, contact),
            phone = COALESCE(?, phone),
            email = COALESCE(?, email),
            address = COALESCE(?, address),
            updated_at = ?
           WHERE id = ?"#
    )
        .bind(update.name.as_deref().map(str::trim))
        .bind(&update.contact)
        .bind(&update.phone)
        .bind(&update.email)
        .bind(&update.address)
        .bind(Utc::now())
        .bind(&supplier_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::supplier_not_found(&supplier_id));
    }

    let updated: Supplier = sqlx::query_as("SELECT * FROM suppliers WHERE id = ?")
        .bind(&supplier_id)
        .fetch_one(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        updated,
        "Supplier updated successfully".to_string(),
    )))
}

/// Batches and orders keep their rows; their supplier link is cleared.
pub async fn delete_supplier(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let supplier_id = path.into_inner();

    let result = sqlx::query("DELETE FROM suppliers WHERE id = ?")
        .bind(&supplier_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::supplier_not_found(&supplier_id));
    }

    log::info!("Supplier {} deleted", supplier_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message(
        (),
        "Supplier deleted successfully".to_string(),
    )))
}
