// src/main.rs - Server bootstrap and route wiring
use actix_cors::Cors;
use actix_web::http::header;
use actix_web::{
    middleware::{Compress, DefaultHeaders, Logger},
    web, App, HttpServer,
};
use actix_web_httpauth::middleware::HttpAuthentication;
use sqlx::{migrate::MigrateDatabase, sqlite::SqliteConnectOptions, Sqlite, SqlitePool};
use std::env;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod analytics_handlers;
mod auth;
mod auth_handlers;
mod config;
mod db;
mod error;
mod field_handlers;
mod handlers;
mod lab_handlers;
mod lifecycle;
mod models;
mod render;
mod reporting_handlers;
mod request_handlers;
mod schedule_handlers;

use auth::{jwt_middleware, AuthService};
use config::{load_config, Config};

pub struct AppState {
    pub db_pool: SqlitePool,
    pub config: Config,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;

    setup_logging(&config)?;

    if env::var("ESP_ENV").as_deref() == Ok("production") {
        validate_production_config(&config)?;
    }

    setup_database(&config.database.url).await?;
    let pool = create_database_pool(&config.database).await?;
    db::run_migrations(&pool).await?;

    let auth_service = Arc::new(AuthService::new(
        &config.auth.jwt_secret,
        config.auth.token_expiration_hours,
    ));

    auth_handlers::create_default_admin_if_needed(&pool, &auth_service)
        .await
        .map_err(|err| anyhow::anyhow!("Failed to seed admin account: {}", err))?;

    let app_state = Arc::new(AppState {
        db_pool: pool,
        config: config.clone(),
    });

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server at http://{}", bind_address);

    let workers = config.server.workers;
    let server = HttpServer::new(move || {
        let cors = setup_cors(&config.security.allowed_origins);
        let auth_middleware = HttpAuthentication::bearer(jwt_middleware);
        let security_headers = setup_security_headers(&config.security);

        App::new()
            .wrap(cors)
            .wrap(security_headers)
            .wrap(Logger::default())
            .wrap(Compress::default())
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::Data::new(auth_service.clone()))
            .route("/health", web::get().to(handlers::health_check))
            .service(
                web::scope("/api/v1/auth")
                    .route("/register", web::post().to(auth_handlers::register_handler))
                    .route("/login", web::post().to(auth_handlers::login_handler)),
            )
            .service(
                web::scope("/api/v1")
                    .wrap(auth_middleware)
                    .route("/auth/me", web::get().to(auth_handlers::me_handler))
                    .service(
                        web::scope("/requests")
                            .route("", web::post().to(request_handlers::create_request_handler))
                            .route("", web::get().to(request_handlers::list_my_requests))
                            .route("/pending", web::get().to(request_handlers::list_pending_requests))
                            .route("/active", web::get().to(request_handlers::list_active_requests))
                            .route("/scheduled", web::get().to(request_handlers::list_scheduled_requests)),
                    )
                    .service(
                        web::scope("/schedules")
                            .route("", web::post().to(schedule_handlers::assign_technician_handler))
                            .route("", web::get().to(schedule_handlers::list_schedules_handler))
                            .route("/{id}", web::put().to(schedule_handlers::update_schedule_handler))
                            .route("/{id}", web::delete().to(schedule_handlers::cancel_schedule_handler)),
                    )
                    .service(
                        web::scope("/samples")
                            .route("", web::get().to(field_handlers::list_samples_handler))
                            .route("", web::post().to(field_handlers::log_sample_handler))
                            .route("/pending-lab", web::get().to(field_handlers::pending_lab_samples_handler))
                            .route("/{id}/status", web::put().to(field_handlers::advance_sample_status_handler)),
                    )
                    .service(
                        web::scope("/manual-readings")
                            .route("", web::get().to(field_handlers::list_manual_readings_handler))
                            .route("", web::post().to(field_handlers::submit_manual_reading_handler)),
                    )
                    .service(
                        web::scope("/sensors")
                            .route("", web::get().to(field_handlers::list_sensors_handler))
                            .route("", web::post().to(field_handlers::create_sensor_handler))
                            .route("/{id}", web::put().to(field_handlers::update_sensor_handler))
                            .route("/{id}", web::delete().to(field_handlers::delete_sensor_handler))
                            .route("/{id}/readings", web::post().to(field_handlers::ingest_reading_handler)),
                    )
                    .service(
                        web::scope("/lab-results")
                            .route("", web::get().to(lab_handlers::list_lab_results_handler))
                            .route("", web::post().to(lab_handlers::submit_lab_result_handler))
                            .route("/{id}", web::put().to(lab_handlers::update_lab_result_handler))
                            .route("/{id}", web::delete().to(lab_handlers::delete_lab_result_handler)),
                    )
                    .service(
                        web::scope("/reports")
                            .route("/generate", web::post().to(reporting_handlers::generate_report_handler))
                            .route("/request/{requestId}", web::get().to(reporting_handlers::report_metadata_handler))
                            .route("/download/{reportId}", web::get().to(reporting_handlers::download_report_handler)),
                    )
                    .service(
                        web::scope("/analytics")
                            .route("/trends", web::get().to(analytics_handlers::trends_handler))
                            .route("/workload", web::get().to(analytics_handlers::workload_handler)),
                    ),
            )
    })
    .bind(&bind_address)?;

    let server = match workers {
        Some(workers) => server.workers(workers),
        None => server,
    };

    server.run().await?;
    Ok(())
}

fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn validate_production_config(config: &Config) -> anyhow::Result<()> {
    if config.auth.jwt_secret.len() < 32 {
        anyhow::bail!("Insecure JWT secret in production! Must be at least 32 characters.");
    }
    if config.security.allowed_origins.contains(&"*".to_string()) {
        anyhow::bail!("Wildcard CORS origins not allowed in production!");
    }
    Ok(())
}

async fn setup_database(database_url: &str) -> anyhow::Result<()> {
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        log::info!("Creating database: {}", database_url);
        Sqlite::create_database(database_url).await?;
    }
    Ok(())
}

async fn create_database_pool(db_config: &config::DatabaseConfig) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&db_config.url)?.create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(db_config.max_connections)
        .connect_with(options)
        .await?;
    Ok(pool)
}

fn setup_cors(allowed_origins: &[String]) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ])
        .max_age(3600);

    if allowed_origins.contains(&"*".to_string()) {
        log::warn!("Using wildcard CORS origin; not suitable for production");
        cors = cors.allow_any_origin();
    } else {
        for origin in allowed_origins {
            if !origin.is_empty() {
                cors = cors.allowed_origin(origin);
            }
        }
    }

    cors
}

fn setup_security_headers(config: &config::SecurityConfig) -> DefaultHeaders {
    let mut headers = DefaultHeaders::new()
        .add(("X-Content-Type-Options", "nosniff"))
        .add(("X-Frame-Options", "DENY"))
        .add(("Referrer-Policy", "strict-origin-when-cross-origin"));

    if config.require_https {
        headers = headers.add((
            "Strict-Transport-Security",
            "max-age=31536000; includeSubDomains",
        ));
    }

    headers
}
