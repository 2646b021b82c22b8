// src/sale_handlers.rs
//! Sales. Creating a sale draws stock from the listed batches; the whole
//! sale commits or rolls back as one transaction.

use actix_web::{web, HttpResponse};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{fetch_page, ApiResponse, PaginationQuery};
use crate::models::*;
use crate::query_builders::{FieldWhitelist, SafeQueryBuilder};
use crate::validator::{BusinessValidator, CustomValidate};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

/// `VTE<millis>-<4 hex>`; the suffix keeps same-millisecond sales distinct.
fn generate_sale_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("VTE{}-{}", Utc::now().timestamp_millis(), &suffix[..4])
}

async fn load_items(pool: &SqlitePool, sale_ids: &[&str]) -> ApiResult<HashMap<String, Vec<SaleItem>>> {
    let mut grouped: HashMap<String, Vec<SaleItem>> = HashMap::new();
    if sale_ids.is_empty() {
        return Ok(grouped);
    }

    let placeholders = sale_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!("SELECT * FROM sale_items WHERE sale_id IN ({}) ORDER BY rowid", placeholders);
    let mut query = sqlx::query_as::<_, SaleItem>(&sql);
    for id in sale_ids {
        query = query.bind(*id);
    }

    for item in query.fetch_all(pool).await? {
        grouped.entry(item.sale_id.clone()).or_default().push(item);
    }
    Ok(grouped)
}

async fn fetch_sale(pool: &SqlitePool, sale_id: &str) -> ApiResult<SaleWithItems> {
    let sale: Sale = sqlx::query_as("SELECT * FROM sales WHERE id = ?")
        .bind(sale_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Sale"))?;

    let items = load_items(pool, &[sale_id]).await?.remove(sale_id).unwrap_or_default();
    Ok(SaleWithItems { sale, items })
}

pub async fn get_sales(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = query.normalize();
    let whitelist = FieldWhitelist::for_sales();

    let mut builder = SafeQueryBuilder::new("*", "sales", &whitelist);
    if let Some(ref search) = query.search {
        builder.add_search(&["sale_number", "customer_name"], search);
    }
    if let Some(ref status) = query.status {
        let status = SaleStatus::from_str(status)
            .map_err(|_| ApiError::bad_request(&format!("Unknown sale status: {}", status)))?;
        builder.add_exact_match("status", status.to_string());
    }
    builder.order_by("date", "DESC").paginate(per_page, offset);

    let sales = fetch_page::<Sale>(&app_state.db_pool, &builder, page, per_page).await?;

    let ids: Vec<&str> = sales.data.iter().map(|s| s.id.as_str()).collect();
    let mut items = load_items(&app_state.db_pool, &ids).await?;
    let response = sales.map(|sale| {
        let items = items.remove(&sale.id).unwrap_or_default();
        SaleWithItems { sale, items }
    });

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub async fn get_sale(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let sale = fetch_sale(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(sale)))
}

pub async fn create_sale(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateSaleRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;
    request.custom_validate().into_result()?;

    let sale_id = Uuid::new_v4().to_string();
    let sale_number = generate_sale_number();
    let now = Utc::now();

    let mut tx = app_state.db_pool.begin().await?;
    let mut lines: Vec<SaleItem> = Vec::with_capacity(request.items.len());

    for item in &request.items {
        let row: BatchWithMedicineRow = sqlx::query_as(
            "SELECT b.*, m.name AS medicine_name FROM batches b JOIN medicines m ON b.medicine_id = m.id WHERE b.id = ?"
        )
            .bind(&item.batch_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::batch_not_found(&item.batch_id))?;

        let medicine_name = row.medicine_name;
        let batch = Batch::from(row.batch);

        let check = BusinessValidator::validate_sale_quantity(&batch, item.quantity);
        if !check.is_valid() {
            return Err(ApiError::InsufficientStock(check.error_message()));
        }
        check.into_result()?;

        app_state.inventory.take_stock(&mut tx, &batch, item.quantity).await?;

        let unit_price = item.unit_price.unwrap_or(batch.sell_price);
        lines.push(SaleItem {
            id: Uuid::new_v4().to_string(),
            sale_id: sale_id.clone(),
            medicine_id: Some(batch.medicine_id.clone()),
            medicine_name,
            batch_id: Some(batch.id.clone()),
            batch_number: batch.batch_number.clone(),
            quantity: item.quantity,
            unit_price,
            total: item.quantity as f64 * unit_price,
        });
    }

    let total: f64 = lines.iter().map(|l| l.total).sum();

    sqlx::query(
        r#"INSERT INTO sales (id, sale_number, date, customer_name, prescription_id, total, payment_method, status, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(&sale_id)
        .bind(&sale_number)
        .bind(now)
        .bind(&request.customer_name)
        .bind(&request.prescription_id)
        .bind(total)
        .bind(request.payment_method.to_string())
        .bind(SaleStatus::Completed.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    for line in &lines {
        sqlx::query(
            r#"INSERT INTO sale_items (id, sale_id, medicine_id, medicine_name, batch_id, batch_number, quantity, unit_price, total)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#
        )
            .bind(&line.id)
            .bind(&line.sale_id)
            .bind(&line.medicine_id)
            .bind(&line.medicine_name)
            .bind(&line.batch_id)
            .bind(&line.batch_number)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.total)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    log::info!("Sale {} recorded: {} lines, total {:.2}", sale_number, lines.len(), total);

    let sale = fetch_sale(&app_state.db_pool, &sale_id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        sale,
        "Sale recorded successfully".to_string(),
    )))
}

/// Edits sale metadata. Refunding does not return stock to the batches.
pub async fn update_sale(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    update: web::Json<UpdateSaleRequest>,
) -> ApiResult<HttpResponse> {
    let sale_id = path.into_inner();
    update.validate()?;

    let result = sqlx::query(
        r#"UPDATE sales SET
            customer_name = COALESCE(?, customer_name),
            prescription_id = COALESCE(?, prescription_id),
            payment_method = COALESCE(?, payment_method),
            status = COALESCE(?, status),
            updated_at = ?
           WHERE id = ?"#
    )
        .bind(&update.customer_name)
        .bind(&update.prescription_id)
        .bind(update.payment_method.map(|p| p.to_string()))
        .bind(update.status.map(|s| s.to_string()))
        .bind(Utc::now())
        .bind(&sale_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Sale"));
    }

    if update.status == Some(SaleStatus::Refunded) {
        log::info!("Sale {} marked as refunded", sale_id);
    }

    let sale = fetch_sale(&app_state.db_pool, &sale_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        sale,
        "Sale updated successfully".to_string(),
    )))
}

pub async fn delete_sale(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let sale_id = path.into_inner();

    let result = sqlx::query("DELETE FROM sales WHERE id = ?")
        .bind(&sale_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Sale"));
    }

    log::info!("Sale {} deleted", sale_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message(
        (),
        "Sale deleted successfully".to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use crate::repositories::test_support::{insert_batch, insert_medicine};
    use crate::{configure_routes, db::test_pool, test_state};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::{json, Value};
    use sqlx::SqlitePool;

    async fn quantity_of(pool: &SqlitePool, batch_id: &str) -> i64 {
        let row: (i64,) = sqlx::query_as("SELECT quantity FROM batches WHERE id = ?")
            .bind(batch_id)
            .fetch_one(pool)
            .await
            .unwrap();
        row.0
    }

    #[actix_rt::test]
    async fn test_sale_decrements_stock() {
        let pool = test_pool().await;
        insert_medicine(&pool, "m1", "Paracetamol", 10).await;
        insert_batch(&pool, "b1", "m1", 20, None).await;
        insert_batch(&pool, "b2", "m1", 5, None).await;
        let app = test::init_service(App::new().app_data(test_state(pool.clone())).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/sales")
            .set_json(json!({
                "customer_name": "A. Client",
                "payment_method": "card",
                "items": [
                    { "batch_id": "b1", "quantity": 4 },
                    { "batch_id": "b2", "quantity": 5, "unit_price": 1.0 }
                ]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;

        let sale = &body["data"];
        assert!(sale["sale_number"].as_str().unwrap().starts_with("VTE"));
        assert_eq!(sale["status"], "completed");
        assert_eq!(sale["payment_method"], "card");
        assert_eq!(sale["items"].as_array().unwrap().len(), 2);
        assert_eq!(sale["items"][0]["medicine_name"], "Paracetamol");
        assert_eq!(sale["items"][0]["unit_price"], 3.5);
        assert_eq!(sale["total"], 19.0);

        assert_eq!(quantity_of(&pool, "b1").await, 16);
        assert_eq!(quantity_of(&pool, "b2").await, 0);
    }

    #[actix_rt::test]
    async fn test_list_sales_by_status() {
        let pool = test_pool().await;
        insert_medicine(&pool, "m1", "Paracetamol", 10).await;
        insert_batch(&pool, "b1", "m1", 20, None).await;
        let app = test::init_service(App::new().app_data(test_state(pool)).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/sales")
            .set_json(json!({ "payment_method": "cash", "items": [{ "batch_id": "b1", "quantity": 1 }] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::get().uri("/api/v1/sales?status=completed").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 1);

        let req = test::TestRequest::get().uri("/api/v1/sales?status=refunded").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 0);

        let req = test::TestRequest::get().uri("/api/v1/sales?status=stolen").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn test_oversell_rolls_back_every_line() {
        let pool = test_pool().await;
        insert_medicine(&pool, "m1", "Paracetamol", 10).await;
        insert_batch(&pool, "b1", "m1", 20, None).await;
        insert_batch(&pool, "b2", "m1", 2, None).await;
        let app = test::init_service(App::new().app_data(test_state(pool.clone())).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/sales")
            .set_json(json!({
                "payment_method": "cash",
                "items": [
                    { "batch_id": "b1", "quantity": 4 },
                    { "batch_id": "b2", "quantity": 3 }
                ]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert_eq!(quantity_of(&pool, "b1").await, 20);
        assert_eq!(quantity_of(&pool, "b2").await, 2);

        let sales: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sales")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(sales.0, 0);
    }

    #[actix_rt::test]
    async fn test_sale_requires_items() {
        let pool = test_pool().await;
        let app = test::init_service(App::new().app_data(test_state(pool)).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/sales")
            .set_json(json!({ "payment_method": "cash", "items": [] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_rt::test]
    async fn test_refund_and_delete_keep_stock() {
        let pool = test_pool().await;
        insert_medicine(&pool, "m1", "Paracetamol", 10).await;
        insert_batch(&pool, "b1", "m1", 10, None).await;
        let app = test::init_service(App::new().app_data(test_state(pool.clone())).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/sales")
            .set_json(json!({ "payment_method": "insurance", "items": [{ "batch_id": "b1", "quantity": 3 }] }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let id = body["data"]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::put()
            .uri(&format!("/api/v1/sales/{}", id))
            .set_json(json!({ "status": "refunded" }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "refunded");
        assert_eq!(quantity_of(&pool, "b1").await, 7);

        let req = test::TestRequest::get().uri("/api/v1/dashboard/stats").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total_sales"], 0);
        assert_eq!(body["data"]["today_sales_amount"], 0.0);

        let req = test::TestRequest::delete().uri(&format!("/api/v1/sales/{}", id)).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(quantity_of(&pool, "b1").await, 7);

        let items: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sale_items")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(items.0, 0);
    }

    #[actix_rt::test]
    async fn test_today_sales_amount() {
        let pool = test_pool().await;
        insert_medicine(&pool, "m1", "Paracetamol", 10).await;
        insert_batch(&pool, "b1", "m1", 10, None).await;
        let app = test::init_service(App::new().app_data(test_state(pool)).configure(configure_routes)).await;

        let req = test::TestRequest::post()
            .uri("/api/v1/sales")
            .set_json(json!({ "payment_method": "cash", "items": [{ "batch_id": "b1", "quantity": 2, "unit_price": 4.25 }] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::get().uri("/api/v1/dashboard/stats").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total_sales"], 1);
        assert_eq!(body["data"]["today_sales_amount"], 8.5);
    }
}
