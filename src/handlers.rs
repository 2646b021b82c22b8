// src/handlers.rs
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use sqlx::SqlitePool;
use chrono::{DateTime, Utc};
use crate::AppState;
use crate::analyzer::{build_expiry_alert_list, build_stock_report, total_stock, is_low_stock, ExpiryClass};
use crate::error::{ApiError, ApiResult};
use crate::models::DashboardStats;
use crate::normalize::parse_lenient_date;
use crate::query_builders::SafeQueryBuilder;

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        Self {
            data,
            total,
            page,
            per_page,
            total_pages: (total + per_page - 1) / per_page,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> PaginatedResponse<U> {
        PaginatedResponse {
            data: self.data.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            total_pages: self.total_pages,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub category: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

const MAX_PAGE: i64 = 1_000_000;

/// Resolves `(page, per_page, offset)` from raw query values.
pub fn normalize_page(page: Option<i64>, per_page: Option<i64>) -> (i64, i64, i64) {
    let page = page.unwrap_or(1).clamp(1, MAX_PAGE);
    let per_page = per_page.unwrap_or(20).clamp(1, 100);
    let offset = (page - 1) * per_page;
    (page, per_page, offset)
}

impl PaginationQuery {
    pub fn normalize(&self) -> (i64, i64, i64) {
        normalize_page(self.page, self.per_page)
    }
}

/// Optional `at` override for the reference instant of expiry calculations.
#[derive(Debug, Default, Deserialize)]
pub struct ReferenceTimeQuery {
    pub at: Option<String>,
}

impl ReferenceTimeQuery {
    pub fn reference_time(&self) -> ApiResult<DateTime<Utc>> {
        match self.at.as_deref().map(str::trim) {
            None | Some("") => Ok(Utc::now()),
            Some(raw) => parse_lenient_date(raw)
                .ok_or_else(|| ApiError::bad_request(&format!("Invalid 'at' timestamp: {}", raw))),
        }
    }
}

/// Runs the count and page queries of a builder and wraps the rows.
pub async fn fetch_page<T>(
    pool: &SqlitePool,
    builder: &SafeQueryBuilder<'_>,
    page: i64,
    per_page: i64,
) -> ApiResult<PaginatedResponse<T>>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> + Send + Unpin,
{
    let (count_sql, count_params) = builder.build_count();
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for p in &count_params {
        count_query = count_query.bind(p);
    }
    let total: i64 = count_query.fetch_one(pool).await?;

    let (select_sql, select_params) = builder.build();
    let mut select_query = sqlx::query_as::<_, T>(&select_sql);
    for p in &select_params {
        select_query = select_query.bind(p);
    }
    let data: Vec<T> = select_query.fetch_all(pool).await?;

    Ok(PaginatedResponse::new(data, total, page, per_page))
}

// ==================== DASHBOARD ====================

pub async fn get_dashboard_stats(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ReferenceTimeQuery>,
) -> ApiResult<HttpResponse> {
    let now = query.reference_time()?;
    let snapshot = app_state.inventory.load_snapshot().await?;
    let alerts = build_expiry_alert_list(&snapshot, now);

    let start_of_day = now
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|d| d.and_utc())
        .unwrap_or(now);

    let total_sales: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sales WHERE status = 'completed'")
        .fetch_one(&app_state.db_pool)
        .await?;

    let today_sales: (f64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(total), 0.0) FROM sales WHERE status = 'completed' AND date >= ? AND date <= ?"
    )
        .bind(start_of_day)
        .bind(now)
        .fetch_one(&app_state.db_pool)
        .await?;

    let pending_orders: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM orders WHERE status = 'pending'")
        .fetch_one(&app_state.db_pool)
        .await?;

    let stats = DashboardStats {
        total_medicines: snapshot.len() as i64,
        total_batches: snapshot.iter().map(|m| m.batches.len() as i64).sum(),
        total_stock: snapshot.iter().fold(0i64, |acc, m| acc.saturating_add(total_stock(m))),
        low_stock_medicines: snapshot.iter().filter(|m| is_low_stock(m)).count() as i64,
        expired_batches: alerts
            .iter()
            .filter(|a| a.classification == ExpiryClass::Expired)
            .count() as i64,
        expiring_soon_batches: alerts
            .iter()
            .filter(|a| a.classification == ExpiryClass::ExpiringSoon)
            .count() as i64,
        total_sales: total_sales.0,
        today_sales_amount: today_sales.0,
        pending_orders: pending_orders.0,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::success(stats)))
}

pub async fn get_stock_report(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<ReferenceTimeQuery>,
) -> ApiResult<HttpResponse> {
    let now = query.reference_time()?;
    let snapshot = app_state.inventory.load_snapshot().await?;
    let report = build_stock_report(&snapshot, now);

    log::debug!(
        "Stock report: {} medicines, {} low stock, {} expiry alerts",
        report.totals.len(),
        report.low_stock.len(),
        report.expiry_alerts.len()
    );

    Ok(HttpResponse::Ok().json(ApiResponse::success(report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::{insert_batch, insert_medicine};
    use crate::{configure_routes, db::test_pool, test_state};
    use actix_web::{test as actix_test, App};
    use chrono::Duration;
    use serde_json::Value;

    #[test]
    fn test_pagination_normalize() {
        let query = PaginationQuery { page: Some(0), per_page: Some(500), ..Default::default() };
        assert_eq!(query.normalize(), (1, 100, 0));

        let query = PaginationQuery { page: Some(3), per_page: None, ..Default::default() };
        assert_eq!(query.normalize(), (3, 20, 40));

        let (page, per_page, offset) = normalize_page(Some(i64::MAX), Some(i64::MAX));
        assert_eq!((page, per_page), (MAX_PAGE, 100));
        assert_eq!(offset, (MAX_PAGE - 1) * 100);

        assert_eq!(normalize_page(Some(i64::MIN), Some(i64::MIN)), (1, 1, 0));
    }

    #[test]
    fn test_total_pages_rounds_up() {
        let page: PaginatedResponse<i32> = PaginatedResponse::new(vec![], 41, 1, 20);
        assert_eq!(page.total_pages, 3);
        let empty: PaginatedResponse<i32> = PaginatedResponse::new(vec![], 0, 1, 20);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_reference_time_override() {
        let query = ReferenceTimeQuery { at: Some("2026-01-10T12:00:00Z".to_string()) };
        assert_eq!(query.reference_time().unwrap().to_rfc3339(), "2026-01-10T12:00:00+00:00");

        let bad = ReferenceTimeQuery { at: Some("yesterday".to_string()) };
        assert!(matches!(bad.reference_time(), Err(ApiError::BadRequest(_))));
    }

    #[actix_rt::test]
    async fn test_stock_report_endpoint() {
        let pool = test_pool().await;
        insert_medicine(&pool, "m1", "Paracetamol", 50).await;
        insert_batch(&pool, "b1", "m1", 30, Some(Utc::now() + Duration::days(10))).await;
        insert_medicine(&pool, "m2", "Vitamin C", 5).await;
        insert_batch(&pool, "b2", "m2", 10, Some(Utc::now() + Duration::days(400))).await;

        let app = actix_test::init_service(App::new().app_data(test_state(pool)).configure(configure_routes)).await;
        let req = actix_test::TestRequest::get().uri("/api/v1/dashboard/stock-report").to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;

        let report = &body["data"];
        assert_eq!(report["total_stock"], 40);
        assert_eq!(report["low_stock"].as_array().unwrap().len(), 1);
        assert_eq!(report["low_stock"][0]["name"], "Paracetamol");
        let alerts = report["expiry_alerts"].as_array().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["classification"], "expiring_soon");
        assert_eq!(alerts[0]["medicine_name"], "Paracetamol");
    }

    #[actix_rt::test]
    async fn test_dashboard_stats_endpoint() {
        let pool = test_pool().await;
        insert_medicine(&pool, "m1", "Paracetamol", 50).await;
        insert_batch(&pool, "b1", "m1", 30, Some(Utc::now() - Duration::days(3))).await;
        insert_batch(&pool, "b2", "m1", 25, Some(Utc::now() + Duration::days(20))).await;
        insert_batch(&pool, "b3", "m1", 0, Some(Utc::now() - Duration::days(3))).await;

        let app = actix_test::init_service(App::new().app_data(test_state(pool)).configure(configure_routes)).await;
        let req = actix_test::TestRequest::get().uri("/api/v1/dashboard/stats").to_request();
        let body: Value = actix_test::call_and_read_body_json(&app, req).await;

        let stats = &body["data"];
        assert_eq!(stats["total_medicines"], 1);
        assert_eq!(stats["total_batches"], 3);
        assert_eq!(stats["total_stock"], 55);
        assert_eq!(stats["low_stock_medicines"], 0);
        assert_eq!(stats["expired_batches"], 1);
        assert_eq!(stats["expiring_soon_batches"], 1);
        assert_eq!(stats["pending_orders"], 0);
    }

    #[actix_rt::test]
    async fn test_invalid_reference_time_is_rejected() {
        let pool = test_pool().await;
        let app = actix_test::init_service(App::new().app_data(test_state(pool)).configure(configure_routes)).await;
        let req = actix_test::TestRequest::get()
            .uri("/api/v1/dashboard/stock-report?at=not-a-date")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }
}
