// src/db.rs - Database migrations and setup
//
// All tables live in one SQLite database. That colocation is what lets every
// coordinated write couple its own insert/update with the service_requests
// status update inside a single transaction.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Enable foreign keys and WAL mode
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;

    // Accounts (identity collaborator; also referenced by requests/schedules)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE CHECK(length(email) >= 5 AND length(email) <= 255),
            password_hash TEXT NOT NULL,
            name TEXT NOT NULL CHECK(length(name) > 0 AND length(name) <= 255),
            organization TEXT CHECK(organization IS NULL OR length(organization) <= 255),
            role TEXT NOT NULL DEFAULT 'customer' CHECK(
                role IN ('admin', 'technician', 'customer')
            ),
            created_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Root entity. Rows are never deleted; status is the shared lifecycle
    // field every coordinated write updates.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS service_requests (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            service_type TEXT NOT NULL CHECK(length(service_type) > 0 AND length(service_type) <= 100),
            location TEXT NOT NULL CHECK(length(location) > 0 AND length(location) <= 255),
            preferred_date DATE NOT NULL,
            status TEXT NOT NULL DEFAULT 'Requested' CHECK(
                status IN ('Requested', 'Scheduled', 'Analyzed', 'DataProcessing', 'Completed')
            ),
            created_at DATETIME NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // UNIQUE(request_id): at most one active schedule per request.
    // Reassignment is an update, cancellation deletes the row.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedules (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL UNIQUE,
            technician_id TEXT NOT NULL,
            scheduled_date DATE NOT NULL,
            created_at DATETIME NOT NULL,
            FOREIGN KEY (request_id) REFERENCES service_requests (id),
            FOREIGN KEY (technician_id) REFERENCES users (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chain-of-custody log; sample_code is the physical label and must be
    // unique across all logs so lab submissions can resolve it.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sample_logs (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            sample_code TEXT NOT NULL UNIQUE CHECK(length(sample_code) > 0 AND length(sample_code) <= 100),
            technician_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Field' CHECK(
                status IN ('Field', 'InTransit', 'ReceivedAtLab', 'Analyzed', 'Done')
            ),
            logged_at DATETIME NOT NULL,
            FOREIGN KEY (request_id) REFERENCES service_requests (id),
            FOREIGN KEY (technician_id) REFERENCES users (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Immutable once created (no update/delete path).
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS manual_readings (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            technician_id TEXT NOT NULL,
            parameter TEXT NOT NULL CHECK(length(parameter) > 0 AND length(parameter) <= 100),
            value REAL NOT NULL,
            unit TEXT NOT NULL CHECK(length(unit) > 0 AND length(unit) <= 20),
            reading_time DATETIME NOT NULL,
            FOREIGN KEY (request_id) REFERENCES service_requests (id),
            FOREIGN KEY (technician_id) REFERENCES users (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // request_id is derived from the sample log at submission time, never
    // supplied by the caller.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lab_results (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            sample_code TEXT NOT NULL,
            parameter TEXT NOT NULL CHECK(length(parameter) > 0 AND length(parameter) <= 100),
            value REAL NOT NULL,
            unit TEXT NOT NULL CHECK(length(unit) > 0 AND length(unit) <= 20),
            test_date DATETIME NOT NULL,
            analyst_name TEXT NOT NULL CHECK(length(analyst_name) > 0 AND length(analyst_name) <= 255),
            recorded_at DATETIME NOT NULL,
            FOREIGN KEY (request_id) REFERENCES service_requests (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // No uniqueness on request_id: regeneration appends a row and the
    // newest one wins for metadata lookups.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            generated_by TEXT NOT NULL,
            file_name TEXT NOT NULL,
            generated_at DATETIME NOT NULL,
            FOREIGN KEY (request_id) REFERENCES service_requests (id),
            FOREIGN KEY (generated_by) REFERENCES users (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Sensor registry (field operations) and the readings written by the
    // external ingestion pipeline. Read-only for the lifecycle core.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensors (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            serial_number TEXT NOT NULL UNIQUE CHECK(length(serial_number) > 0 AND length(serial_number) <= 100),
            sensor_type TEXT NOT NULL CHECK(length(sensor_type) > 0 AND length(sensor_type) <= 100),
            location TEXT NOT NULL CHECK(length(location) > 0 AND length(location) <= 255),
            install_date DATE NOT NULL,
            status TEXT NOT NULL DEFAULT 'Online' CHECK(length(status) > 0 AND length(status) <= 50),
            FOREIGN KEY (user_id) REFERENCES users (id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id TEXT PRIMARY KEY,
            sensor_id TEXT NOT NULL,
            parameter TEXT NOT NULL CHECK(length(parameter) > 0 AND length(parameter) <= 100),
            value REAL NOT NULL,
            recorded_at DATETIME NOT NULL,
            FOREIGN KEY (sensor_id) REFERENCES sensors (id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Lookup indexes for the queue views and the trend aggregation
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_requests_status ON service_requests (status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sample_logs_request ON sample_logs (request_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_lab_results_request ON lab_results (request_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_readings_request ON manual_readings (request_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sensor_readings_sensor ON sensor_readings (sensor_id)")
        .execute(pool)
        .await?;

    log::info!("Database migrations completed");
    Ok(())
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use crate::models::RequestStatus;
    use chrono::{NaiveDate, Utc};
    use sqlx::sqlite::SqlitePoolOptions;
    use uuid::Uuid;

    /// In-memory pool pinned to a single connection so every query sees the
    /// same database.
    pub async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    pub async fn insert_user(pool: &SqlitePool, name: &str, role: &str) -> String {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, name, organization, role, created_at)
             VALUES (?, ?, 'x', ?, 'Test Org', ?, ?)",
        )
        .bind(&id)
        .bind(format!("{}@example.com", id))
        .bind(name)
        .bind(role)
        .bind(Utc::now())
        .execute(pool)
        .await
        .expect("insert user");
        id
    }

    pub async fn insert_request(pool: &SqlitePool, user_id: &str) -> String {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO service_requests
             (id, user_id, service_type, location, preferred_date, status, created_at)
             VALUES (?, ?, 'Air Quality', 'Plant 3', ?, 'Requested', ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap())
        .bind(Utc::now())
        .execute(pool)
        .await
        .expect("insert request");
        id
    }

    pub async fn request_status(pool: &SqlitePool, request_id: &str) -> RequestStatus {
        sqlx::query_as::<_, (RequestStatus,)>(
            "SELECT status FROM service_requests WHERE id = ?",
        )
        .bind(request_id)
        .fetch_one(pool)
        .await
        .expect("request status")
        .0
    }
}
