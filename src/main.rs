// Pharmacy stock service: inventory, expiry alerts, sales and supplier orders
use actix_web::{
    middleware::{Compress, DefaultHeaders, Logger},
    web, App, HttpServer,
};
use actix_web::http::header;
use actix_cors::Cors;
use anyhow::Context;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod analyzer;
mod batch_handlers;
mod config;
mod db;
mod error;
mod handlers;
mod medicine_handlers;
mod models;
mod monitoring;
mod normalize;
mod order_handlers;
pub mod query_builders;
pub mod repositories;
mod sale_handlers;
mod supplier_handlers;
pub mod validator;

use config::{load_config, Config};
use error::ApiError;
use monitoring::{Metrics, RequestLogger, start_alert_sweep};
use repositories::{InventoryStore, SqliteInventoryStore};

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
    pub inventory: Arc<dyn InventoryStore>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config) -> Self {
        let inventory: Arc<dyn InventoryStore> = Arc::new(SqliteInventoryStore::new(db_pool.clone()));
        Self {
            db_pool,
            config,
            inventory,
            metrics: Arc::new(Metrics::new()),
        }
    }
}

// ==================== MAIN ====================

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    setup_logging(&config)?;
    config.print_startup_info();

    if config.is_production() {
        validate_production_config(&config)?;
    }

    let pool = db::create_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let app_state = Arc::new(AppState::new(pool, config.clone()));

    start_alert_sweep(app_state.inventory.clone());

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let server_config = config.clone();
    let mut server = HttpServer::new(move || {
        let cors = setup_cors(&server_config.security.allowed_origins);
        let security_headers = setup_security_headers(&server_config.security);
        let json_config = web::JsonConfig::default()
            .limit(server_config.security.max_request_size)
            .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into());

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(RequestLogger::new(app_state.metrics.clone()))
            .app_data(web::Data::new(app_state.clone()))
            .app_data(json_config)
            .configure(configure_routes)
    })
        .keep_alive(Duration::from_secs(config.server.keep_alive))
        .client_request_timeout(Duration::from_secs(config.server.client_timeout));

    if let Some(workers) = config.server.workers {
        server = server.workers(workers);
    }

    server
        .bind(&bind_address)
        .with_context(|| format!("Failed to bind {}", bind_address))?
        .run()
        .await
        .context("Server failed to run")?;

    Ok(())
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg
        // Health check and metrics
        .service(
            web::scope("/health")
                .route("", web::get().to(monitoring::health_check))
                .route("/ready", web::get().to(monitoring::readiness_check))
                .route("/live", web::get().to(monitoring::liveness_check))
                .route("/metrics", web::get().to(monitoring::metrics_endpoint))
        )
        .service(
            web::scope("/api/v1")
                .service(
                    web::scope("/dashboard")
                        .route("/stats", web::get().to(handlers::get_dashboard_stats))
                        .route("/stock-report", web::get().to(handlers::get_stock_report))
                )
                .service(
                    web::scope("/medicines")
                        .route("", web::get().to(medicine_handlers::get_medicines))
                        .route("", web::post().to(medicine_handlers::create_medicine))
                        .route("/low-stock", web::get().to(medicine_handlers::get_low_stock_medicines))
                        .route("/import", web::post().to(medicine_handlers::import_medicines))
                        .route("/{id}", web::get().to(medicine_handlers::get_medicine))
                        .route("/{id}", web::put().to(medicine_handlers::update_medicine))
                        .route("/{id}", web::delete().to(medicine_handlers::delete_medicine))
                )
                .service(
                    web::scope("/batches")
                        .route("", web::get().to(batch_handlers::get_batches))
                        .route("", web::post().to(batch_handlers::create_batch))
                        .route("/expiring", web::get().to(batch_handlers::get_expiring_batches))
                        .route("/{id}", web::get().to(batch_handlers::get_batch))
                        .route("/{id}", web::put().to(batch_handlers::update_batch))
                        .route("/{id}", web::delete().to(batch_handlers::delete_batch))
                )
                .service(
                    web::scope("/suppliers")
                        .route("", web::get().to(supplier_handlers::get_suppliers))
                        .route("", web::post().to(supplier_handlers::create_supplier))
                        .route("/{id}", web::get().to(supplier_handlers::get_supplier))
                        .route("/{id}", web::put().to(supplier_handlers::update_supplier))
                        .route("/{id}", web::delete().to(supplier_handlers::delete_supplier))
                )
                .service(
                    web::scope("/sales")
                        .route("", web::get().to(sale_handlers::get_sales))
                        .route("", web::post().to(sale_handlers::create_sale))
                        .route("/{id}", web::get().to(sale_handlers::get_sale))
                        .route("/{id}", web::put().to(sale_handlers::update_sale))
                        .route("/{id}", web::delete().to(sale_handlers::delete_sale))
                )
                .service(
                    web::scope("/orders")
                        .route("", web::get().to(order_handlers::get_orders))
                        .route("", web::post().to(order_handlers::create_order))
                        .route("/{id}", web::get().to(order_handlers::get_order))
                        .route("/{id}", web::put().to(order_handlers::update_order))
                        .route("/{id}", web::delete().to(order_handlers::delete_order))
                )
        );
}

// ==================== HELPER FUNCTIONS ====================

pub fn setup_cors(allowed_origins: &[String]) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::USER_AGENT,
            header::REFERER,
        ])
        .expose_headers(vec![header::CONTENT_LENGTH])
        .max_age(3600);

    if allowed_origins.iter().any(|o| o == "*") {
        log::warn!("Using wildcard CORS (*) in development mode");
        cors = cors.allow_any_origin().allow_any_header().allow_any_method();
    } else {
        for origin in allowed_origins.iter().filter(|o| !o.is_empty()) {
            log::debug!("Adding CORS origin: {}", origin);
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("Failed to initialise logging")?;
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .context("Failed to initialise logging")?;
    }

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.security.allowed_origins.iter().any(|o| o == "*") {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }

    Ok(())
}

fn setup_security_headers(config: &config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("X-XSS-Protection", "1; mode=block"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains; preload"
        ));
    }

    headers
}

#[cfg(test)]
pub(crate) fn test_state(pool: SqlitePool) -> web::Data<Arc<AppState>> {
    web::Data::new(Arc::new(AppState::new(pool, Config::default())))
}
