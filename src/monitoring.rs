// src/monitoring.rs
use actix_web::{HttpResponse, web};
use serde::Serialize;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use std::time::Instant;
use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration};
use crate::AppState;
use crate::analyzer::{build_stock_report, ExpiryClass};
use crate::error::ApiResult;
use crate::repositories::InventoryStore;

const ALERT_SWEEP_INTERVAL_SECS: u64 = 3600;
const MAX_SAMPLES: usize = 1000;

#[derive(Debug)]
pub struct Metrics {
    pub request_count: AtomicU64,
    pub error_count: AtomicU64,
    pub response_times: std::sync::Mutex<Vec<u64>>,
    started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            response_times: std::sync::Mutex::new(Vec::new()),
            started_at: Instant::now(),
        }
    }

    pub fn increment_requests(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_errors(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response_time(&self, time_ms: u64) {
        if let Ok(mut times) = self.response_times.lock() {
            times.push(time_ms);
            if times.len() > MAX_SAMPLES {
                times.remove(0);
            }
        }
    }

    pub fn average_response_time(&self) -> f64 {
        match self.response_times.lock() {
            Ok(times) if !times.is_empty() => times.iter().sum::<u64>() as f64 / times.len() as f64,
            _ => 0.0,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Serialize)]
pub struct MetricsResponse {
    pub requests_total: u64,
    pub errors_total: u64,
    pub avg_response_time_ms: f64,
    pub database_connections: u32,
    pub idle_connections: usize,
}

pub async fn health_check(app_state: web::Data<Arc<AppState>>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: app_state.metrics.uptime_seconds(),
    })
}

pub async fn readiness_check(app_state: web::Data<Arc<AppState>>) -> HttpResponse {
    match sqlx::query("SELECT 1").fetch_one(&app_state.db_pool).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ready",
            "database": "connected"
        })),
        Err(e) => {
            log::error!("Readiness check failed: {}", e);
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "not ready",
                "database": "disconnected"
            }))
        }
    }
}

pub async fn liveness_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "alive",
        "timestamp": Utc::now()
    }))
}

pub async fn metrics_endpoint(app_state: web::Data<Arc<AppState>>) -> HttpResponse {
    let metrics = &app_state.metrics;

    HttpResponse::Ok().json(MetricsResponse {
        requests_total: metrics.request_count.load(Ordering::Relaxed),
        errors_total: metrics.error_count.load(Ordering::Relaxed),
        avg_response_time_ms: metrics.average_response_time(),
        database_connections: app_state.db_pool.size(),
        idle_connections: app_state.db_pool.num_idle(),
    })
}

pub struct RequestLogger {
    metrics: Arc<Metrics>,
}

impl RequestLogger {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl<S, B> actix_web::dev::Transform<S, actix_web::dev::ServiceRequest> for RequestLogger
where
    S: actix_web::dev::Service<
        actix_web::dev::ServiceRequest,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type InitError = ();
    type Transform = RequestLoggerMiddleware<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RequestLoggerMiddleware {
            service,
            metrics: self.metrics.clone(),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: S,
    metrics: Arc<Metrics>,
}

impl<S, B> actix_web::dev::Service<actix_web::dev::ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: actix_web::dev::Service<
        actix_web::dev::ServiceRequest,
        Response = actix_web::dev::ServiceResponse<B>,
        Error = actix_web::Error,
    >,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = actix_web::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, ctx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.service.poll_ready(ctx)
    }

    fn call(&self, req: actix_web::dev::ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let metrics = self.metrics.clone();
        let method = req.method().clone();
        let path = req.path().to_string();
        let fut = self.service.call(req);

        Box::pin(async move {
            metrics.increment_requests();
            let res = fut.await;
            let elapsed = start_time.elapsed().as_millis() as u64;
            metrics.record_response_time(elapsed);

            match res {
                Ok(ref response) if response.status().is_server_error() => {
                    metrics.increment_errors();
                    log::error!("{} {} -> {} in {}ms", method, path, response.status(), elapsed);
                }
                Ok(ref response) if response.status().is_client_error() => {
                    metrics.increment_errors();
                    log::debug!("{} {} -> {} in {}ms", method, path, response.status(), elapsed);
                }
                Err(_) => metrics.increment_errors(),
                _ => {}
            }
            res
        })
    }
}

// ==================== ALERT SWEEP ====================

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct AlertSummary {
    pub expired: usize,
    pub expiring_soon: usize,
    pub low_stock: usize,
}

/// Builds a stock report from a fresh snapshot and logs what needs attention.
pub async fn run_alert_sweep(
    inventory: &dyn InventoryStore,
    now: DateTime<Utc>,
) -> ApiResult<AlertSummary> {
    let snapshot = inventory.load_snapshot().await?;
    let report = build_stock_report(&snapshot, now);

    let mut summary = AlertSummary {
        low_stock: report.low_stock.len(),
        ..Default::default()
    };
    for alert in &report.expiry_alerts {
        match alert.classification {
            ExpiryClass::Expired => summary.expired += 1,
            ExpiryClass::ExpiringSoon => summary.expiring_soon += 1,
            ExpiryClass::Normal => {}
        }
    }

    if summary.expired > 0 {
        log::warn!("{} batch(es) past their expiry date", summary.expired);
    }
    if summary.expiring_soon > 0 {
        log::warn!("{} batch(es) expiring soon", summary.expiring_soon);
    }
    for item in &report.low_stock {
        log::warn!("Low stock: {} ({} / min {})", item.name, item.total_stock, item.min_stock);
    }

    Ok(summary)
}

pub fn start_alert_sweep(inventory: Arc<dyn InventoryStore>) {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(ALERT_SWEEP_INTERVAL_SECS));

        loop {
            interval.tick().await;
            log::info!("Starting hourly stock alert sweep...");

            match run_alert_sweep(inventory.as_ref(), Utc::now()).await {
                Ok(summary) => log::info!(
                    "Alert sweep done: {} expired, {} expiring soon, {} low stock",
                    summary.expired, summary.expiring_soon, summary.low_stock
                ),
                Err(e) => log::error!("Alert sweep failed: {}", e),
            }
        }
    });
}
