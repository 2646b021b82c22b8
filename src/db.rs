// src/db.rs - Database pool and schema setup

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use anyhow::{Context, Result};
use crate::config::DatabaseConfig;

pub async fn create_pool(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&config.url)
        .with_context(|| format!("Invalid database URL: {}", config.url))?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout))
        .idle_timeout(Duration::from_secs(config.idle_timeout))
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    // In-memory databases reject WAL; not fatal.
    if let Err(e) = sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await {
        log::debug!("WAL mode not enabled: {}", e);
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS suppliers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            contact TEXT CHECK(contact IS NULL OR length(contact) <= 255),
            phone TEXT CHECK(phone IS NULL OR length(phone) <= 50),
            email TEXT CHECK(email IS NULL OR length(email) <= 255),
            address TEXT CHECK(address IS NULL OR length(address) <= 500),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS medicines (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE CHECK(length(name) > 0 AND length(name) <= 255),
            generic_name TEXT CHECK(generic_name IS NULL OR length(generic_name) <= 255),
            dosage TEXT CHECK(dosage IS NULL OR length(dosage) <= 100),
            form TEXT CHECK(form IS NULL OR length(form) <= 100),
            category TEXT CHECK(category IS NULL OR length(category) <= 100),
            min_stock INTEGER NOT NULL DEFAULT 10 CHECK(min_stock >= 0),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    // Batch dates are RFC 3339 text, read back leniently.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batches (
            id TEXT PRIMARY KEY,
            medicine_id TEXT NOT NULL,
            batch_number TEXT NOT NULL CHECK(length(batch_number) > 0 AND length(batch_number) <= 100),
            quantity INTEGER NOT NULL DEFAULT 0 CHECK(quantity >= 0),
            purchase_price REAL NOT NULL DEFAULT 0 CHECK(purchase_price >= 0),
            sell_price REAL NOT NULL DEFAULT 0 CHECK(sell_price >= 0),
            manufacturing_date TEXT,
            expiry_date TEXT,
            received_date TEXT,
            supplier_id TEXT,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (medicine_id) REFERENCES medicines (id) ON DELETE CASCADE,
            FOREIGN KEY (supplier_id) REFERENCES suppliers (id) ON DELETE SET NULL,
            UNIQUE(medicine_id, batch_number)
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sales (
            id TEXT PRIMARY KEY,
            sale_number TEXT NOT NULL UNIQUE,
            date DATETIME NOT NULL,
            customer_name TEXT CHECK(customer_name IS NULL OR length(customer_name) <= 255),
            prescription_id TEXT CHECK(prescription_id IS NULL OR length(prescription_id) <= 100),
            total REAL NOT NULL DEFAULT 0 CHECK(total >= 0),
            payment_method TEXT NOT NULL CHECK(payment_method IN ('cash', 'card', 'insurance')),
            status TEXT NOT NULL DEFAULT 'completed' CHECK(status IN ('completed', 'refunded')),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sale_items (
            id TEXT PRIMARY KEY,
            sale_id TEXT NOT NULL,
            medicine_id TEXT,
            medicine_name TEXT NOT NULL,
            batch_id TEXT,
            batch_number TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK(quantity > 0),
            unit_price REAL NOT NULL CHECK(unit_price >= 0),
            total REAL NOT NULL CHECK(total >= 0),
            FOREIGN KEY (sale_id) REFERENCES sales (id) ON DELETE CASCADE,
            FOREIGN KEY (medicine_id) REFERENCES medicines (id) ON DELETE SET NULL,
            FOREIGN KEY (batch_id) REFERENCES batches (id) ON DELETE SET NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            order_number TEXT NOT NULL UNIQUE,
            supplier_id TEXT,
            supplier_name TEXT NOT NULL,
            date DATE NOT NULL,
            expected_delivery DATE,
            status TEXT NOT NULL DEFAULT 'pending' CHECK(
                status IN ('pending', 'confirmed', 'shipped', 'delivered', 'cancelled')
            ),
            total REAL NOT NULL DEFAULT 0 CHECK(total >= 0),
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL,
            FOREIGN KEY (supplier_id) REFERENCES suppliers (id) ON DELETE SET NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            medicine_id TEXT,
            medicine_name TEXT NOT NULL,
            quantity INTEGER NOT NULL CHECK(quantity > 0),
            unit_price REAL NOT NULL CHECK(unit_price >= 0),
            total REAL NOT NULL CHECK(total >= 0),
            FOREIGN KEY (order_id) REFERENCES orders (id) ON DELETE CASCADE,
            FOREIGN KEY (medicine_id) REFERENCES medicines (id) ON DELETE SET NULL
        )
        "#,
    )
        .execute(pool)
        .await?;

    create_indexes(pool).await?;

    log::info!("Database migrations completed");
    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    let index_queries = [
        "CREATE INDEX IF NOT EXISTS idx_medicines_name ON medicines(name)",
        "CREATE INDEX IF NOT EXISTS idx_medicines_category ON medicines(category)",
        "CREATE INDEX IF NOT EXISTS idx_batches_medicine_id ON batches(medicine_id)",
        "CREATE INDEX IF NOT EXISTS idx_batches_expiry_date ON batches(expiry_date)",
        "CREATE INDEX IF NOT EXISTS idx_batches_supplier_id ON batches(supplier_id)",
        "CREATE INDEX IF NOT EXISTS idx_sales_date ON sales(date)",
        "CREATE INDEX IF NOT EXISTS idx_sale_items_sale_id ON sale_items(sale_id)",
        "CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status)",
        "CREATE INDEX IF NOT EXISTS idx_order_items_order_id ON order_items(order_id)",
    ];

    for query in index_queries.iter() {
        sqlx::query(query).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    run_migrations(&pool).await.expect("migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_rt::test]
    async fn test_migrations_are_idempotent() {
        let pool = test_pool().await;
        run_migrations(&pool).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
            .fetch_all(&pool)
            .await
            .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        for expected in ["batches", "medicines", "order_items", "orders", "sale_items", "sales", "suppliers"] {
            assert!(names.contains(&expected), "missing table {}", expected);
        }
    }

    #[actix_rt::test]
    async fn test_negative_quantity_rejected_by_schema() {
        let pool = test_pool().await;
        let now = chrono::Utc::now();
        sqlx::query("INSERT INTO medicines (id, name, min_stock, created_at, updated_at) VALUES ('m1', 'Aspirin', 10, ?, ?)")
            .bind(now)
            .bind(now)
            .execute(&pool)
            .await
            .unwrap();

        let result = sqlx::query(
            "INSERT INTO batches (id, medicine_id, batch_number, quantity, created_at, updated_at) VALUES ('b1', 'm1', 'L1', -1, ?, ?)",
        )
            .bind(now)
            .bind(now)
            .execute(&pool)
            .await;
        assert!(result.is_err());
    }

    #[actix_rt::test]
    async fn test_deleting_medicine_cascades_to_batches() {
        let pool = test_pool().await;
        let now = chrono::Utc::now();
        sqlx::query("INSERT INTO medicines (id, name, min_stock, created_at, updated_at) VALUES ('m1', 'Aspirin', 10, ?, ?)")
            .bind(now)
            .bind(now)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO batches (id, medicine_id, batch_number, quantity, created_at, updated_at) VALUES ('b1', 'm1', 'L1', 5, ?, ?)",
        )
            .bind(now)
            .bind(now)
            .execute(&pool)
            .await
            .unwrap();

        sqlx::query("DELETE FROM medicines WHERE id = 'm1'")
            .execute(&pool)
            .await
            .unwrap();

        let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM batches")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(remaining.0, 0);
    }
}
