// src/reporting_handlers.rs - Report generation, metadata lookup and download
//
// Generation is the closing coordinated write: render the document, then
// commit the metadata row and the `Completed` status together. There is no
// status precondition - the lifecycle is advisory and an admin may close a
// request at any point.

use actix_files::NamedFile;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{get_current_user, require_admin, UserRole};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::lifecycle::{apply_transition, LifecycleEvent};
use crate::models::{
    GenerateReportRequest, LabResult, ManualReading, Report, ReportMetadata, ServiceRequest,
};
use crate::render::render_report_document;
use crate::AppState;

// ==================== CORE OPERATIONS ====================

pub async fn generate_report(
    pool: &SqlitePool,
    reports_dir: &Path,
    admin_user_id: &str,
    request_id: &str,
) -> ApiResult<Report> {
    let request = sqlx::query_as::<_, ServiceRequest>(
        "SELECT * FROM service_requests WHERE id = ?",
    )
    .bind(request_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::request_not_found(request_id))?;

    let lab_results = sqlx::query_as::<_, LabResult>(
        "SELECT * FROM lab_results WHERE request_id = ? ORDER BY recorded_at ASC",
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;

    let manual_readings = sqlx::query_as::<_, ManualReading>(
        "SELECT * FROM manual_readings WHERE request_id = ? ORDER BY reading_time ASC",
    )
    .bind(request_id)
    .fetch_all(pool)
    .await?;

    // Render before touching the database; a render failure must leave no
    // report row and no status change.
    let path = render_report_document(reports_dir, &request, &lab_results, &manual_readings)?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ApiError::InternalServerError("Invalid report path".to_string()))?
        .to_string();

    let report = Report {
        id: Uuid::new_v4().to_string(),
        request_id: request_id.to_string(),
        generated_by: admin_user_id.to_string(),
        file_name,
        generated_at: Utc::now(),
    };

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO reports (id, request_id, generated_by, file_name, generated_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&report.id)
    .bind(&report.request_id)
    .bind(&report.generated_by)
    .bind(&report.file_name)
    .bind(report.generated_at)
    .execute(&mut *tx)
    .await?;

    apply_transition(&mut tx, request_id, LifecycleEvent::ReportGenerated).await?;

    tx.commit().await?;
    log::info!(
        "Report {} generated for request {} by {}",
        report.id,
        request_id,
        admin_user_id
    );
    Ok(report)
}

/// Newest report for a request; regeneration appends rows.
pub async fn report_metadata_for_request(
    pool: &SqlitePool,
    request_id: &str,
) -> ApiResult<ReportMetadata> {
    sqlx::query_as::<_, ReportMetadata>(
        "SELECT id, file_name FROM reports WHERE request_id = ?
         ORDER BY generated_at DESC LIMIT 1",
    )
    .bind(request_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::not_found("Report"))
}

/// File name for a report, after checking the caller may read it: the owner
/// of the underlying request, or an admin.
pub async fn authorize_report_download(
    pool: &SqlitePool,
    report_id: &str,
    requesting_user_id: &str,
    requesting_role: UserRole,
) -> ApiResult<String> {
    let row = sqlx::query_as::<_, (String, String)>(
        "SELECT r.file_name, sr.user_id
         FROM reports r
         JOIN service_requests sr ON r.request_id = sr.id
         WHERE r.id = ?",
    )
    .bind(report_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::report_not_found(report_id))?;

    let (file_name, owner_user_id) = row;
    if owner_user_id != requesting_user_id && requesting_role != UserRole::Admin {
        return Err(ApiError::Forbidden(
            "You are not the owner of this report".to_string(),
        ));
    }
    Ok(file_name)
}

// ==================== HTTP HANDLERS ====================

pub async fn generate_report_handler(
    app_state: web::Data<Arc<AppState>>,
    payload: web::Json<GenerateReportRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_admin(&http_request)?;
    payload.validate()?;

    let reports_dir = Path::new(&app_state.config.reporting.reports_dir);
    let report = generate_report(
        &app_state.db_pool,
        reports_dir,
        &claims.sub,
        &payload.request_id,
    )
    .await?;

    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        report,
        "Report generated and request completed".to_string(),
    )))
}

pub async fn report_metadata_handler(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    get_current_user(&http_request)?;
    let metadata = report_metadata_for_request(&app_state.db_pool, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(metadata)))
}

pub async fn download_report_handler(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<NamedFile> {
    let claims = get_current_user(&http_request)?;

    let file_name = authorize_report_download(
        &app_state.db_pool,
        &path.into_inner(),
        &claims.sub,
        claims.role,
    )
    .await?;

    let file_path = Path::new(&app_state.config.reporting.reports_dir).join(file_name);
    NamedFile::open(file_path)
        .map_err(|_| ApiError::InternalServerError("Report file is missing".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use crate::field_handlers::log_sample;
    use crate::lab_handlers::submit_lab_result;
    use crate::models::{CreateLabResultRequest, LogSampleRequest, RequestStatus};
    use crate::schedule_handlers::assign_technician;
    use chrono::NaiveDate;

    #[actix_rt::test]
    async fn generation_completes_the_request_and_persists_metadata() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let customer = insert_user(&pool, "Cust", "customer").await;
        let admin = insert_user(&pool, "Admin", "admin").await;
        let request = insert_request(&pool, &customer).await;

        let report = generate_report(&pool, dir.path(), &admin, &request).await.unwrap();

        assert_eq!(request_status(&pool, &request).await, RequestStatus::Completed);
        let metadata = report_metadata_for_request(&pool, &request).await.unwrap();
        assert_eq!(metadata.id, report.id);
        assert!(dir.path().join(&report.file_name).exists());
    }

    #[actix_rt::test]
    async fn generation_for_unknown_request_is_not_found() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let admin = insert_user(&pool, "Admin", "admin").await;

        let err = generate_report(&pool, dir.path(), &admin, "missing").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[actix_rt::test]
    async fn download_is_owner_or_admin_only() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let owner = insert_user(&pool, "Owner", "customer").await;
        let other = insert_user(&pool, "Other", "customer").await;
        let admin = insert_user(&pool, "Admin", "admin").await;
        let request = insert_request(&pool, &owner).await;
        let report = generate_report(&pool, dir.path(), &admin, &request).await.unwrap();

        assert!(
            authorize_report_download(&pool, &report.id, &owner, UserRole::Customer)
                .await
                .is_ok()
        );
        assert!(
            authorize_report_download(&pool, &report.id, &admin, UserRole::Admin)
                .await
                .is_ok()
        );
        let err = authorize_report_download(&pool, &report.id, &other, UserRole::Customer)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }

    #[actix_rt::test]
    async fn full_lifecycle_scenario() {
        let pool = test_pool().await;
        let dir = tempfile::tempdir().unwrap();
        let customer = insert_user(&pool, "Cust", "customer").await;
        let tech = insert_user(&pool, "Tech 1", "technician").await;
        let admin = insert_user(&pool, "Admin", "admin").await;

        // Requested
        let request = insert_request(&pool, &customer).await;
        assert_eq!(request_status(&pool, &request).await, RequestStatus::Requested);

        // Scheduled
        assign_technician(
            &pool,
            &crate::models::AssignScheduleRequest {
                request_id: request.clone(),
                technician_id: tech.clone(),
                scheduled_date: NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(),
            },
        )
        .await
        .unwrap();
        assert_eq!(request_status(&pool, &request).await, RequestStatus::Scheduled);

        // Sample logged in the field
        log_sample(
            &pool,
            &tech,
            &LogSampleRequest {
                request_id: request.clone(),
                sample_code: "S-1".to_string(),
                status: None,
            },
        )
        .await
        .unwrap();

        // Lab result -> sample Analyzed, request Analyzed
        submit_lab_result(
            &pool,
            &CreateLabResultRequest {
                sample_code: "S-1".to_string(),
                parameter: "PM2.5".to_string(),
                value: 42.0,
                unit: "µg/m³".to_string(),
                test_date: Utc::now(),
                analyst_name: "Analyst A".to_string(),
            },
        )
        .await
        .unwrap();
        assert_eq!(request_status(&pool, &request).await, RequestStatus::Analyzed);

        // Report -> Completed
        let report = generate_report(&pool, dir.path(), &admin, &request).await.unwrap();
        assert_eq!(request_status(&pool, &request).await, RequestStatus::Completed);
        assert_eq!(report.request_id, request);

        let content =
            std::fs::read_to_string(dir.path().join(&report.file_name)).unwrap();
        assert!(content.contains("PM2.5"));
    }
}
