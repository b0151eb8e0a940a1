// src/field_handlers.rs - Field operations: sample custody, manual readings, sensors
//
// Two coordinated writes live here. Advancing a sample log to `Analyzed` or
// `Done` moves the owning request to `Analyzed` or `DataProcessing`, and
// submitting a manual reading always forces `DataProcessing`. Logging a new
// sample and the sensor registry have no lifecycle impact.

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
use crate::models::{
    AdvanceSampleStatusRequest, CreateManualReadingRequest, CreateSensorRequest,
    IngestReadingRequest, LogSampleRequest, ManualReading, ManualReadingWithStatus,
    PendingSample, SampleLog, SampleStatus, Sensor, SensorReading, UpdateSensorRequest,
};
use crate::AppState;

// ==================== SAMPLE CUSTODY ====================

pub async fn log_sample(
    pool: &SqlitePool,
    technician_id: &str,
    payload: &LogSampleRequest,
) -> ApiResult<SampleLog> {
    sqlx::query_as::<_, (String,)>("SELECT id FROM service_requests WHERE id = ?")
        .bind(&payload.request_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::request_not_found(&payload.request_id))?;

    let sample = SampleLog {
        id: Uuid::new_v4().to_string(),
        request_id: payload.request_id.clone(),
        sample_code: payload.sample_code.clone(),
        technician_id: technician_id.to_string(),
        status: payload.status.unwrap_or(SampleStatus::Field),
        logged_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO sample_logs (id, request_id, sample_code, technician_id, status, logged_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&sample.id)
    .bind(&sample.request_id)
    .bind(&sample.sample_code)
    .bind(&sample.technician_id)
    .bind(sample.status)
    .bind(sample.logged_at)
    .execute(pool)
    .await
    .map_err(|err| match ApiError::from(err) {
        ApiError::Conflict(_) => ApiError::sample_already_logged(&payload.sample_code),
        other => other,
    })?;

    log::info!(
        "Technician {} logged sample {} for request {}",
        technician_id,
        sample.sample_code,
        sample.request_id
    );
    Ok(sample)
}

/// Advances a custody log; `Analyzed` and `Done` also move the owning
/// request, inside the same transaction.
pub async fn advance_sample_status(
    pool: &SqlitePool,
    log_id: &str,
    new_status: SampleStatus,
) -> ApiResult<SampleLog> {
    let mut tx = pool.begin().await?;

    let request_id = sqlx::query_as::<_, (String,)>(
        "SELECT request_id FROM sample_logs WHERE id = ?",
    )
    .bind(log_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("Sample log"))?
    .0;

    sqlx::query("UPDATE sample_logs SET status = ? WHERE id = ?")
        .bind(new_status)
        .bind(log_id)
        .execute(&mut *tx)
        .await?;

    match new_status {
        SampleStatus::Analyzed => {
            apply_transition(&mut tx, &request_id, LifecycleEvent::SampleAnalyzed).await?;
        }
        SampleStatus::Done => {
            apply_transition(&mut tx, &request_id, LifecycleEvent::SampleDone).await?;
        }
        _ => {}
    }

    tx.commit().await?;

    let sample = sqlx::query_as::<_, SampleLog>("SELECT * FROM sample_logs WHERE id = ?")
        .bind(log_id)
        .fetch_one(pool)
        .await?;
    Ok(sample)
}

pub async fn list_samples(pool: &SqlitePool) -> ApiResult<Vec<SampleLog>> {
    let samples =
        sqlx::query_as::<_, SampleLog>("SELECT * FROM sample_logs ORDER BY logged_at DESC")
            .fetch_all(pool)
            .await?;
    Ok(samples)
}

/// Samples received at the lab and waiting for analysis.
pub async fn list_samples_pending_lab(pool: &SqlitePool) -> ApiResult<Vec<PendingSample>> {
    let samples = sqlx::query_as::<_, PendingSample>(
        "SELECT id, sample_code, request_id FROM sample_logs WHERE status = ?",
    )
    .bind(SampleStatus::ReceivedAtLab)
    .fetch_all(pool)
    .await?;
    Ok(samples)
}

// ==================== MANUAL READINGS ====================

/// Coordinated write: the reading and the `DataProcessing` status commit
/// together or not at all. Readings are immutable afterwards.
pub async fn submit_manual_reading(
    pool: &SqlitePool,
    technician_id: &str,
    payload: &CreateManualReadingRequest,
) -> ApiResult<ManualReading> {
    let reading = ManualReading {
        id: Uuid::new_v4().to_string(),
        request_id: payload.request_id.clone(),
        technician_id: technician_id.to_string(),
        parameter: payload.parameter.clone(),
        value: payload.value,
        unit: payload.unit.clone(),
        reading_time: Utc::now(),
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO manual_readings
         (id, request_id, technician_id, parameter, value, unit, reading_time)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&reading.id)
    .bind(&reading.request_id)
    .bind(&reading.technician_id)
    .bind(&reading.parameter)
    .bind(reading.value)
    .bind(&reading.unit)
    .bind(reading.reading_time)
    .execute(&mut *tx)
    .await?;

    apply_transition(&mut tx, &payload.request_id, LifecycleEvent::ManualReadingRecorded)
        .await?;

    tx.commit().await?;
    Ok(reading)
}

pub async fn list_manual_readings(
    pool: &SqlitePool,
) -> ApiResult<Vec<ManualReadingWithStatus>> {
    let readings = sqlx::query_as::<_, ManualReadingWithStatus>(
        "SELECT mr.*, sr.status AS request_status
         FROM manual_readings mr
         JOIN service_requests sr ON mr.request_id = sr.id
         ORDER BY mr.reading_time DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(readings)
}

// ==================== SENSOR REGISTRY ====================

pub async fn create_sensor(pool: &SqlitePool, payload: &CreateSensorRequest) -> ApiResult<Sensor> {
    let sensor = Sensor {
        id: Uuid::new_v4().to_string(),
        user_id: payload.user_id.clone(),
        serial_number: payload.serial_number.clone(),
        sensor_type: payload.sensor_type.clone(),
        location: payload.location.clone(),
        install_date: payload.install_date,
        status: "Online".to_string(),
    };

    sqlx::query(
        "INSERT INTO sensors (id, user_id, serial_number, sensor_type, location, install_date, status)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&sensor.id)
    .bind(&sensor.user_id)
    .bind(&sensor.serial_number)
    .bind(&sensor.sensor_type)
    .bind(&sensor.location)
    .bind(sensor.install_date)
    .bind(&sensor.status)
    .execute(pool)
    .await?;

    Ok(sensor)
}

pub async fn update_sensor(
    pool: &SqlitePool,
    sensor_id: &str,
    payload: &UpdateSensorRequest,
) -> ApiResult<Sensor> {
    let result = sqlx::query(
        "UPDATE sensors SET serial_number = ?, sensor_type = ?, location = ?, install_date = ?, status = ?
         WHERE id = ?",
    )
    .bind(&payload.serial_number)
    .bind(&payload.sensor_type)
    .bind(&payload.location)
    .bind(payload.install_date)
    .bind(&payload.status)
    .bind(sensor_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Sensor"));
    }

    let sensor = sqlx::query_as::<_, Sensor>("SELECT * FROM sensors WHERE id = ?")
        .bind(sensor_id)
        .fetch_one(pool)
        .await?;
    Ok(sensor)
}

pub async fn delete_sensor(pool: &SqlitePool, sensor_id: &str) -> ApiResult<()> {
    let result = sqlx::query("DELETE FROM sensors WHERE id = ?")
        .bind(sensor_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Sensor"));
    }
    Ok(())
}

/// Storage interface for the external ingestion pipeline.
pub async fn ingest_sensor_reading(
    pool: &SqlitePool,
    sensor_id: &str,
    payload: &IngestReadingRequest,
) -> ApiResult<SensorReading> {
    sqlx::query_as::<_, (String,)>("SELECT id FROM sensors WHERE id = ?")
        .bind(sensor_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Sensor"))?;

    let reading = SensorReading {
        id: Uuid::new_v4().to_string(),
        sensor_id: sensor_id.to_string(),
        parameter: payload.parameter.clone(),
        value: payload.value,
        recorded_at: payload.recorded_at.unwrap_or_else(Utc::now),
    };

    sqlx::query(
        "INSERT INTO sensor_readings (id, sensor_id, parameter, value, recorded_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&reading.id)
    .bind(&reading.sensor_id)
    .bind(&reading.parameter)
    .bind(reading.value)
    .bind(reading.recorded_at)
    .execute(pool)
    .await?;

    Ok(reading)
}

// ==================== HTTP HANDLERS ====================

pub async fn list_samples_handler(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;
    let samples = list_samples(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(samples)))
}

pub async fn log_sample_handler(
    app_state: web::Data<Arc<AppState>>,
    payload: web::Json<LogSampleRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_staff(&http_request)?;
    payload.validate()?;

    let sample = log_sample(&app_state.db_pool, &claims.sub, &payload).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(sample)))
}

pub async fn pending_lab_samples_handler(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;
    let samples = list_samples_pending_lab(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(samples)))
}

pub async fn advance_sample_status_handler(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    payload: web::Json<AdvanceSampleStatusRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;

    let sample =
        advance_sample_status(&app_state.db_pool, &path.into_inner(), payload.status).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(sample)))
}

pub async fn list_manual_readings_handler(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;
    let readings = list_manual_readings(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(readings)))
}

pub async fn submit_manual_reading_handler(
    app_state: web::Data<Arc<AppState>>,
    payload: web::Json<CreateManualReadingRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_staff(&http_request)?;
    payload.validate()?;

    let reading = submit_manual_reading(&app_state.db_pool, &claims.sub, &payload).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        reading,
        "Manual reading recorded and request moved to data processing".to_string(),
    )))
}

pub async fn list_sensors_handler(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;
    let sensors =
        sqlx::query_as::<_, Sensor>("SELECT * FROM sensors ORDER BY install_date DESC")
            .fetch_all(&app_state.db_pool)
            .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(sensors)))
}

pub async fn create_sensor_handler(
    app_state: web::Data<Arc<AppState>>,
    payload: web::Json<CreateSensorRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;
    payload.validate()?;

    let sensor = create_sensor(&app_state.db_pool, &payload).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(sensor)))
}

pub async fn update_sensor_handler(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    payload: web::Json<UpdateSensorRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;
    payload.validate()?;

    let sensor = update_sensor(&app_state.db_pool, &path.into_inner(), &payload).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(sensor)))
}

pub async fn delete_sensor_handler(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;
    delete_sensor(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "message": "Sensor deleted"
    }))))
}

pub async fn ingest_reading_handler(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    payload: web::Json<IngestReadingRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;
    payload.validate()?;

    let reading =
        ingest_sensor_reading(&app_state.db_pool, &path.into_inner(), &payload).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(reading)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use crate::models::RequestStatus;

    async fn logged_sample(pool: &SqlitePool, code: &str) -> (String, SampleLog) {
        let customer = insert_user(pool, "Cust", "customer").await;
        let tech = insert_user(pool, "Tech", "technician").await;
        let request = insert_request(pool, &customer).await;
        let sample = log_sample(
            pool,
            &tech,
            &LogSampleRequest {
                request_id: request.clone(),
                sample_code: code.to_string(),
                status: None,
            },
        )
        .await
        .unwrap();
        (request, sample)
    }

    #[actix_rt::test]
    async fn logging_a_sample_does_not_touch_request_status() {
        let pool = test_pool().await;
        let (request, sample) = logged_sample(&pool, "S-1").await;

        assert_eq!(sample.status, SampleStatus::Field);
        assert_eq!(request_status(&pool, &request).await, RequestStatus::Requested);
    }

    #[actix_rt::test]
    async fn duplicate_sample_code_conflicts() {
        let pool = test_pool().await;
        let (request, _) = logged_sample(&pool, "S-1").await;
        let tech = insert_user(&pool, "Tech 2", "technician").await;

        let err = log_sample(
            &pool,
            &tech,
            &LogSampleRequest {
                request_id: request,
                sample_code: "S-1".to_string(),
                status: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[actix_rt::test]
    async fn in_transit_advance_leaves_request_alone() {
        let pool = test_pool().await;
        let (request, sample) = logged_sample(&pool, "S-1").await;

        let updated = advance_sample_status(&pool, &sample.id, SampleStatus::InTransit)
            .await
            .unwrap();

        assert_eq!(updated.status, SampleStatus::InTransit);
        assert_eq!(request_status(&pool, &request).await, RequestStatus::Requested);
    }

    #[actix_rt::test]
    async fn analyzed_advance_moves_request_to_analyzed() {
        let pool = test_pool().await;
        let (request, sample) = logged_sample(&pool, "S-1").await;

        advance_sample_status(&pool, &sample.id, SampleStatus::Analyzed)
            .await
            .unwrap();

        assert_eq!(request_status(&pool, &request).await, RequestStatus::Analyzed);
    }

    #[actix_rt::test]
    async fn done_advance_moves_request_to_data_processing() {
        let pool = test_pool().await;
        let (request, sample) = logged_sample(&pool, "S-1").await;

        advance_sample_status(&pool, &sample.id, SampleStatus::Done)
            .await
            .unwrap();

        assert_eq!(
            request_status(&pool, &request).await,
            RequestStatus::DataProcessing
        );
    }

    #[actix_rt::test]
    async fn manual_reading_forces_data_processing() {
        let pool = test_pool().await;
        let customer = insert_user(&pool, "Cust", "customer").await;
        let tech = insert_user(&pool, "Tech", "technician").await;
        let request = insert_request(&pool, &customer).await;

        submit_manual_reading(
            &pool,
            &tech,
            &CreateManualReadingRequest {
                request_id: request.clone(),
                parameter: "PM2.5".to_string(),
                value: 35.2,
                unit: "µg/m³".to_string(),
            },
        )
        .await
        .unwrap();

        assert_eq!(
            request_status(&pool, &request).await,
            RequestStatus::DataProcessing
        );
    }

    #[actix_rt::test]
    async fn manual_reading_for_unknown_request_rolls_back() {
        let pool = test_pool().await;
        let tech = insert_user(&pool, "Tech", "technician").await;

        let err = submit_manual_reading(
            &pool,
            &tech,
            &CreateManualReadingRequest {
                request_id: "missing".to_string(),
                parameter: "NO2".to_string(),
                value: 12.0,
                unit: "ppb".to_string(),
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ApiError::NotFound(_) | ApiError::BadRequest(_)));
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM manual_readings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[actix_rt::test]
    async fn pending_lab_lists_only_received_samples() {
        let pool = test_pool().await;
        let (_, s1) = logged_sample(&pool, "S-1").await;
        let (_, _s2) = logged_sample(&pool, "S-2").await;
        advance_sample_status(&pool, &s1.id, SampleStatus::ReceivedAtLab)
            .await
            .unwrap();

        let pending = list_samples_pending_lab(&pool).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sample_code, "S-1");
    }

    #[actix_rt::test]
    async fn race_between_cancel_and_manual_reading_is_commit_ordered() {
        use crate::schedule_handlers::{assign_technician, cancel_schedule};
        use chrono::NaiveDate;

        let pool = test_pool().await;
        let customer = insert_user(&pool, "Cust", "customer").await;
        let tech = insert_user(&pool, "Tech", "technician").await;
        let reading = CreateManualReadingRequest {
            request_id: String::new(),
            parameter: "SO2".to_string(),
            value: 4.1,
            unit: "ppb".to_string(),
        };

        // Order A: cancel commits last -> Requested
        let request_a = insert_request(&pool, &customer).await;
        let schedule_a = assign_technician(
            &pool,
            &crate::models::AssignScheduleRequest {
                request_id: request_a.clone(),
                technician_id: tech.clone(),
                scheduled_date: NaiveDate::from_ymd_opt(2025, 7, 3).unwrap(),
            },
        )
        .await
        .unwrap();
        submit_manual_reading(
            &pool,
            &tech,
            &CreateManualReadingRequest {
                request_id: request_a.clone(),
                ..reading_clone(&reading)
            },
        )
        .await
        .unwrap();
        cancel_schedule(&pool, &schedule_a.id).await.unwrap();
        assert_eq!(request_status(&pool, &request_a).await, RequestStatus::Requested);

        // Order B: manual reading commits last -> DataProcessing
        let request_b = insert_request(&pool, &customer).await;
        let schedule_b = assign_technician(
            &pool,
            &crate::models::AssignScheduleRequest {
                request_id: request_b.clone(),
                technician_id: tech.clone(),
                scheduled_date: NaiveDate::from_ymd_opt(2025, 7, 3).unwrap(),
            },
        )
        .await
        .unwrap();
        cancel_schedule(&pool, &schedule_b.id).await.unwrap();
        submit_manual_reading(
            &pool,
            &tech,
            &CreateManualReadingRequest {
                request_id: request_b.clone(),
                ..reading_clone(&reading)
            },
        )
        .await
        .unwrap();
        assert_eq!(
            request_status(&pool, &request_b).await,
            RequestStatus::DataProcessing
        );
    }

    fn reading_clone(r: &CreateManualReadingRequest) -> CreateManualReadingRequest {
        CreateManualReadingRequest {
            request_id: r.request_id.clone(),
            parameter: r.parameter.clone(),
            value: r.value,
            unit: r.unit.clone(),
        }
    }
}
