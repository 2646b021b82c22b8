// src/order_handlers.rs
use actix_web::{web, HttpResponse};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use crate::AppState;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{fetch_page, ApiResponse, PaginationQuery};
use crate::models::*;
use crate::query_builders::{FieldWhitelist, SafeQueryBuilder};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;
use validator::Validate;

fn generate_order_number() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("CMD{}-{}", Utc::now().timestamp_millis(), &suffix[..4])
}

async fn load_items(pool: &SqlitePool, order_ids: &[&str]) -> ApiResult<HashMap<String, Vec<OrderItem>>> {
    let mut grouped: HashMap<String, Vec<OrderItem>> = HashMap::new();
    if order_ids.is_empty() {
        return Ok(grouped);
    }

    let placeholders = order_ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let sql = format!("SELECT * FROM order_items WHERE order_id IN ({}) ORDER BY rowid", placeholders);
    let mut query = sqlx::query_as::<_, OrderItem>(&sql);
    for id in order_ids {
        query = query.bind(*id);
    }

    for item in query.fetch_all(pool).await? {
        grouped.entry(item.order_id.clone()).or_default().push(item);
    }
    Ok(grouped)
}

async fn fetch_order(pool: &SqlitePool, order_id: &str) -> ApiResult<OrderWithItems> {
    let order: SupplierOrder = sqlx::query_as("SELECT * FROM orders WHERE id = ?")
        .bind(order_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Order"))?;

    let items = load_items(pool, &[order_id]).await?.remove(order_id).unwrap_or_default();
    Ok(OrderWithItems { order, items })
}

pub async fn get_orders(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<PaginationQuery>,
) -> ApiResult<HttpResponse> {
    let (page, per_page, offset) = query.normalize();
    let whitelist = FieldWhitelist::for_orders();

    let mut builder = SafeQueryBuilder::new("*", "orders", &whitelist);
    if let Some(ref search) = query.search {
        builder.add_search(&["order_number", "supplier_name"], search);
    }
    if let Some(ref status) = query.status {
        let status = OrderStatus::from_str(status)
            .map_err(|_| ApiError::bad_request(&format!("Unknown order status: {}", status)))?;
        builder.add_exact_match("status", status.to_string());
    }
    builder.order_by("date", "DESC").order_by("order_number", "DESC").paginate(per_page, offset);

    let orders = fetch_page::<SupplierOrder>(&app_state.db_pool, &builder, page, per_page).await?;

    let ids: Vec<&str> = orders.data.iter().map(|o| o.id.as_str()).collect();
    let mut items = load_items(&app_state.db_pool, &ids).await?;
    let response = orders.map(|order| {
        let items = items.remove(&order.id).unwrap_or_default();
        OrderWithItems { order, items }
    });

    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub async fn get_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let order = fetch_order(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(order)))
}

/// Supplier and medicine names are copied onto the order at creation time.
pub async fn create_order(
    app_state: web::Data<Arc<AppState>>,
    request: web::Json<CreateOrderRequest>,
) -> ApiResult<HttpResponse> {
    request.validate()?;

    let order_id = Uuid::new_v4().to_string();
    let order_number = generate_order_number();
    let now = Utc::now();

    let mut tx = app_state.db_pool.begin().await?;

    let supplier_name: (String,) = sqlx::query_as("SELECT name FROM suppliers WHERE id = ?")
        .bind(&request.supplier_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::supplier_not_found(&request.supplier_id))?;

    let mut lines: Vec<OrderItem> = Vec::with_capacity(request.items.len());
    for item in &request.items {
        let medicine_name: (String,) = sqlx::query_as("SELECT name FROM medicines WHERE id = ?")
            .bind(&item.medicine_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::medicine_not_found(&item.medicine_id))?;

        lines.push(OrderItem {
            id: Uuid::new_v4().to_string(),
            order_id: order_id.clone(),
            medicine_id: Some(item.medicine_id.clone()),
            medicine_name: medicine_name.0,
            quantity: item.quantity,
            unit_price: item.unit_price,
            total: item.quantity as f64 * item.unit_price,
        });
    }

    let total: f64 = lines.iter().map(|l| l.total).sum();

    sqlx::query(
        r#"INSERT INTO orders (id, order_number, supplier_id, supplier_name, date, expected_delivery, status, total, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    )
        .bind(&order_id)
        .bind(&order_number)
        .bind(&request.supplier_id)
        .bind(&supplier_name.0)
        .bind(now.date_naive())
        .bind(request.expected_delivery)
        .bind(OrderStatus::Pending.to_string())
        .bind(total)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

    for line in &lines {
        sqlx::query(
            r#"INSERT INTO order_items (id, order_id, medicine_id, medicine_name, quantity, unit_price, total)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#
        )
            .bind(&line.id)
            .bind(&line.order_id)
            .bind(&line.medicine_id)
            .bind(&line.medicine_name)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.total)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    log::info!("Order {} placed with {}: total {:.2}", order_number, supplier_name.0, total);

    let order = fetch_order(&app_state.db_pool, &order_id).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        order,
        "Order created successfully".to_string(),
    )))
}

pub async fn update_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    update: web::Json<UpdateOrderRequest>,
) -> ApiResult<HttpResponse> {
    let order_id = path.into_inner();
    update.validate()?;

    let result = sqlx::query(
        r#"UPDATE orders SET
            status = COALESCE(?, status),
            expected_delivery = COALESCE(?, expected_delivery),
            updated_at = ?
           WHERE id = ?"#
    )
        .bind(update.status.map(|s| s.to_string()))
        .bind(update.expected_delivery)
        .bind(Utc::now())
        .bind(&order_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Order"));
    }

    if let Some(status) = update.status {
        log::info!("Order {} moved to {}", order_id, status);
    }

    let order = fetch_order(&app_state.db_pool, &order_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
        order,
        "Order updated successfully".to_string(),
    )))
}

pub async fn delete_order(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let order_id = path.into_inner();

    let result = sqlx::query("DELETE FROM orders WHERE id = ?")
        .bind(&order_id)
        .execute(&app_state.db_pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Order"));
    }

    log::info!("Order {} deleted", order_id);

    Ok(HttpResponse::Ok().json(ApiResponse::<()>::success_with_message(
        (),
        "Order deleted successfully".to_string(),
    )))
}
