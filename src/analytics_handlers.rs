// src/analytics_handlers.rs - Read-only projections
//
// No lifecycle impact: the trend query joins three measurement sources and
// only ever sees committed state, because every coordinated write is atomic
// per operation.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::auth::{get_current_user, require_admin};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::models::{TrendPoint, WorkloadDay};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    pub parameter: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Per-day mean of every reading for one user and parameter, across lab
/// results, manual readings and ingested sensor data. Lab and manual data
/// attribute to the request owner, sensor data to the sensor owner.
pub async fn trend_for_user(
    pool: &SqlitePool,
    user_id: &str,
    query: &TrendQuery,
) -> ApiResult<Vec<TrendPoint>> {
    let points = sqlx::query_as::<_, TrendPoint>(
        "WITH all_measurements AS (
             SELECT sr.user_id AS user_id, lr.test_date AS ts, lr.value AS value
             FROM lab_results lr
             JOIN service_requests sr ON lr.request_id = sr.id
             WHERE lr.parameter = ? AND date(lr.test_date) BETWEEN ? AND ?

             UNION ALL

             SELECT sr.user_id, mr.reading_time, mr.value
             FROM manual_readings mr
             JOIN service_requests sr ON mr.request_id = sr.id
             WHERE mr.parameter = ? AND date(mr.reading_time) BETWEEN ? AND ?

             UNION ALL

             SELECT s.user_id, sd.recorded_at, sd.value
             FROM sensor_readings sd
             JOIN sensors s ON sd.sensor_id = s.id
             WHERE sd.parameter = ? AND date(sd.recorded_at) BETWEEN ? AND ?
         )
         SELECT date(ts) AS date, ROUND(AVG(value), 2) AS value
         FROM all_measurements
         WHERE user_id = ?
         GROUP BY date(ts)
         ORDER BY date ASC",
    )
    .bind(&query.parameter)
    .bind(query.start_date)
    .bind(query.end_date)
    .bind(&query.parameter)
    .bind(query.start_date)
    .bind(query.end_date)
    .bind(&query.parameter)
    .bind(query.start_date)
    .bind(query.end_date)
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(points)
}

/// Scheduled jobs per day over the next five days.
pub async fn workload_forecast(pool: &SqlitePool) -> ApiResult<Vec<WorkloadDay>> {
    let days = sqlx::query_as::<_, WorkloadDay>(
        "SELECT scheduled_date, COUNT(*) AS jobs
         FROM schedules
         WHERE scheduled_date >= date('now') AND scheduled_date < date('now', '+5 days')
         GROUP BY scheduled_date
         ORDER BY scheduled_date ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(days)
}

// ==================== HTTP HANDLERS ====================

pub async fn trends_handler(
    app_state: web::Data<Arc<AppState>>,
    query: web::Query<TrendQuery>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    if query.parameter.is_empty() {
        return Err(ApiError::bad_request("Parameter is required"));
    }
    if query.start_date > query.end_date {
        return Err(ApiError::bad_request("start_date must not be after end_date"));
    }

    let points = trend_for_user(&app_state.db_pool, &claims.sub, &query).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(points)))
}

pub async fn workload_handler(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_admin(&http_request)?;
    let days = workload_forecast(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(days)))
}
