// src/lab_handlers.rs - Lab analysis results
//
// Submission is the widest coordinated write in the system: the sample code
// is resolved to its field log (rejecting before any write when unknown),
// then the result row, the log's `Analyzed` status and the owning request's
// `Analyzed` status commit as one transaction.
//
// Deletion intentionally does not revert the sample log or the request;
// the forward transition has no reverse edge.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::auth::require_staff;
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::lifecycle::{apply_transition, LifecycleEvent};
use crate::models::{CreateLabResultRequest, LabResult, SampleStatus, UpdateLabResultRequest};
use crate::AppState;

// ==================== CORE OPERATIONS ====================

pub async fn submit_lab_result(
    pool: &SqlitePool,
    payload: &CreateLabResultRequest,
) -> ApiResult<LabResult> {
    let mut tx = pool.begin().await?;

    // Resolve the physical sample code; the request reference is derived,
    // never taken from the caller.
    let request_id = sqlx::query_as::<_, (String,)>(
        "SELECT request_id FROM sample_logs WHERE sample_code = ?",
    )
    .bind(&payload.sample_code)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::sample_not_found(&payload.sample_code))?
    .0;

    let result = LabResult {
        id: Uuid::new_v4().to_string(),
        request_id: request_id.clone(),
        sample_code: payload.sample_code.clone(),
        parameter: payload.parameter.clone(),
        value: payload.value,
        unit: payload.unit.clone(),
        test_date: payload.test_date,
        analyst_name: payload.analyst_name.clone(),
        recorded_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO lab_results
         (id, request_id, sample_code, parameter, value, unit, test_date, analyst_name, recorded_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&result.id)
    .bind(&result.request_id)
    .bind(&result.sample_code)
    .bind(&result.parameter)
    .bind(result.value)
    .bind(&result.unit)
    .bind(result.test_date)
    .bind(&result.analyst_name)
    .bind(result.recorded_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE sample_logs SET status = ? WHERE sample_code = ?")
        .bind(SampleStatus::Analyzed)
        .bind(&payload.sample_code)
        .execute(&mut *tx)
        .await?;

    apply_transition(&mut tx, &request_id, LifecycleEvent::LabResultRecorded).await?;

    tx.commit().await?;
    log::info!(
        "Lab result {} recorded for sample {} (request {})",
        result.id,
        result.sample_code,
        request_id
    );
    Ok(result)
}

pub async fn list_lab_results(pool: &SqlitePool) -> ApiResult<Vec<LabResult>> {
    let results =
        sqlx::query_as::<_, LabResult>("SELECT * FROM lab_results ORDER BY recorded_at DESC")
            .fetch_all(pool)
            .await?;
    Ok(results)
}

/// Correction of a recorded result; no status side effect.
pub async fn update_lab_result(
    pool: &SqlitePool,
    result_id: &str,
    payload: &UpdateLabResultRequest,
) -> ApiResult<LabResult> {
    let result = sqlx::query(
        "UPDATE lab_results
         SET parameter = ?, value = ?, unit = ?, test_date = ?, analyst_name = ?
         WHERE id = ?",
    )
    .bind(&payload.parameter)
    .bind(payload.value)
    .bind(&payload.unit)
    .bind(payload.test_date)
    .bind(&payload.analyst_name)
    .bind(result_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Lab result"));
    }

    let updated = sqlx::query_as::<_, LabResult>("SELECT * FROM lab_results WHERE id = ?")
        .bind(result_id)
        .fetch_one(pool)
        .await?;
    Ok(updated)
}

pub async fn delete_lab_result(pool: &SqlitePool, result_id: &str) -> ApiResult<()> {
    let result = sqlx::query("DELETE FROM lab_results WHERE id = ?")
        .bind(result_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Lab result"));
    }
    Ok(())
}

// ==================== HTTP HANDLERS ====================

pub async fn list_lab_results_handler(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;
    let results = list_lab_results(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(results)))
}

pub async fn submit_lab_result_handler(
    app_state: web::Data<Arc<AppState>>,
    payload: web::Json<CreateLabResultRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_staff(&http_request)?;
    payload.validate()?;

    let result = submit_lab_result(&app_state.db_pool, &payload).await?;
    log::info!("Staff {} submitted lab result {}", claims.sub, result.id);
    Ok(HttpResponse::Created().json(ApiResponse::success(result)))
}

pub async fn update_lab_result_handler(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    payload: web::Json<UpdateLabResultRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;
    payload.validate()?;

    let result = update_lab_result(&app_state.db_pool, &path.into_inner(), &payload).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(result)))
}

pub async fn delete_lab_result_handler(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;
    let result_id = path.into_inner();

    delete_lab_result(&app_state.db_pool, &result_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "message": format!("Lab result {} deleted", result_id)
    }))))
}
