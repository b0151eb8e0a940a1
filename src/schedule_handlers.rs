// src/schedule_handlers.rs - Technician assignment
//
// Assign and cancel are coordinated writes: the schedule row and the request
// status move in one transaction. Reassignment only touches the schedule row
// and leaves the status alone.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::auth::require_admin;
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::lifecycle::{apply_transition, LifecycleEvent};
use crate::models::{AssignScheduleRequest, Schedule, ScheduleOverview, UpdateScheduleRequest};
use crate::AppState;

// ==================== CORE OPERATIONS ====================

pub async fn assign_technician(
    pool: &SqlitePool,
    payload: &AssignScheduleRequest,
) -> ApiResult<Schedule> {
    let schedule = Schedule {
        id: Uuid::new_v4().to_string(),
        request_id: payload.request_id.clone(),
        technician_id: payload.technician_id.clone(),
        scheduled_date: payload.scheduled_date,
        created_at: Utc::now(),
    };

    let mut tx = pool.begin().await?;

    // Referenced request must exist before anything is written
    sqlx::query_as::<_, (String,)>("SELECT id FROM service_requests WHERE id = ?")
        .bind(&payload.request_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::request_not_found(&payload.request_id))?;

    sqlx::query(
        "INSERT INTO schedules (id, request_id, technician_id, scheduled_date, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&schedule.id)
    .bind(&schedule.request_id)
    .bind(&schedule.technician_id)
    .bind(schedule.scheduled_date)
    .bind(schedule.created_at)
    .execute(&mut *tx)
    .await
    .map_err(|err| match ApiError::from(err) {
        ApiError::Conflict(_) => ApiError::schedule_already_exists(&payload.request_id),
        other => other,
    })?;

    apply_transition(&mut tx, &payload.request_id, LifecycleEvent::ScheduleAssigned).await?;

    tx.commit().await?;
    Ok(schedule)
}

pub async fn update_schedule(
    pool: &SqlitePool,
    schedule_id: &str,
    payload: &UpdateScheduleRequest,
) -> ApiResult<Schedule> {
    let result = sqlx::query(
        "UPDATE schedules SET technician_id = ?, scheduled_date = ? WHERE id = ?",
    )
    .bind(&payload.technician_id)
    .bind(payload.scheduled_date)
    .bind(schedule_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::schedule_not_found(schedule_id));
    }

    let schedule = sqlx::query_as::<_, Schedule>("SELECT * FROM schedules WHERE id = ?")
        .bind(schedule_id)
        .fetch_one(pool)
        .await?;
    Ok(schedule)
}

/// Cancels the assignment and puts the request back into the intake queue.
pub async fn cancel_schedule(pool: &SqlitePool, schedule_id: &str) -> ApiResult<()> {
    let mut tx = pool.begin().await?;

    let request_id = sqlx::query_as::<_, (String,)>(
        "SELECT request_id FROM schedules WHERE id = ?",
    )
    .bind(schedule_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::schedule_not_found(schedule_id))?
    .0;

    sqlx::query("DELETE FROM schedules WHERE id = ?")
        .bind(schedule_id)
        .execute(&mut *tx)
        .await?;

    apply_transition(&mut tx, &request_id, LifecycleEvent::ScheduleCancelled).await?;

    tx.commit().await?;
    log::info!("Schedule {} cancelled, request {} back in queue", schedule_id, request_id);
    Ok(())
}

pub async fn list_schedules(pool: &SqlitePool) -> ApiResult<Vec<ScheduleOverview>> {
    let schedules = sqlx::query_as::<_, ScheduleOverview>(
        "SELECT
             s.id, s.request_id, s.scheduled_date,
             sr.service_type, sr.status AS request_status,
             s.technician_id, up_tech.name AS technician_name,
             up_cust.organization AS customer_organization
         FROM schedules s
         JOIN service_requests sr ON s.request_id = sr.id
         JOIN users up_tech ON s.technician_id = up_tech.id
         JOIN users up_cust ON sr.user_id = up_cust.id
         ORDER BY s.scheduled_date DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(schedules)
}

// ==================== HTTP HANDLERS ====================

pub async fn assign_technician_handler(
    app_state: web::Data<Arc<AppState>>,
    payload: web::Json<AssignScheduleRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = require_admin(&http_request)?;
    payload.validate()?;

    let schedule = assign_technician(&app_state.db_pool, &payload).await?;
    log::info!(
        "Admin {} assigned technician {} to request {}",
        claims.sub,
        schedule.technician_id,
        schedule.request_id
    );
    Ok(HttpResponse::Created().json(ApiResponse::success(schedule)))
}

pub async fn list_schedules_handler(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_admin(&http_request)?;
    let schedules = list_schedules(&app_state.db_pool).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(schedules)))
}

pub async fn update_schedule_handler(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    payload: web::Json<UpdateScheduleRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_admin(&http_request)?;
    payload.validate()?;

    let schedule = update_schedule(&app_state.db_pool, &path.into_inner(), &payload).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(schedule)))
}

pub async fn cancel_schedule_handler(
    app_state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_admin(&http_request)?;
    let schedule_id = path.into_inner();

    cancel_schedule(&app_state.db_pool, &schedule_id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "message": format!("Schedule {} cancelled, request returned to queue", schedule_id)
    }))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use crate::models::RequestStatus;
    use crate::request_handlers::list_requests_by_status;
    use chrono::NaiveDate;

    fn assignment(request_id: &str, technician_id: &str) -> AssignScheduleRequest {
        AssignScheduleRequest {
            request_id: request_id.to_string(),
            technician_id: technician_id.to_string(),
            scheduled_date: NaiveDate::from_ymd_opt(2025, 7, 10).unwrap(),
        }
    }

    #[actix_rt::test]
    async fn assignment_moves_request_to_scheduled() {
        let pool = test_pool().await;
        let customer = insert_user(&pool, "Cust", "customer").await;
        let tech = insert_user(&pool, "Tech", "technician").await;
        let request = insert_request(&pool, &customer).await;

        let schedule = assign_technician(&pool, &assignment(&request, &tech)).await.unwrap();

        assert_eq!(schedule.request_id, request);
        assert_eq!(request_status(&pool, &request).await, RequestStatus::Scheduled);
    }

    #[actix_rt::test]
    async fn assignment_for_unknown_request_writes_nothing() {
        let pool = test_pool().await;
        let tech = insert_user(&pool, "Tech", "technician").await;

        let err = assign_technician(&pool, &assignment("missing", &tech)).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM schedules")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[actix_rt::test]
    async fn second_assignment_for_same_request_conflicts() {
        let pool = test_pool().await;
        let customer = insert_user(&pool, "Cust", "customer").await;
        let tech = insert_user(&pool, "Tech", "technician").await;
        let request = insert_request(&pool, &customer).await;

        assign_technician(&pool, &assignment(&request, &tech)).await.unwrap();
        let err = assign_technician(&pool, &assignment(&request, &tech)).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[actix_rt::test]
    async fn reassignment_keeps_the_request_status() {
        let pool = test_pool().await;
        let customer = insert_user(&pool, "Cust", "customer").await;
        let tech1 = insert_user(&pool, "Tech 1", "technician").await;
        let tech2 = insert_user(&pool, "Tech 2", "technician").await;
        let request = insert_request(&pool, &customer).await;
        let schedule = assign_technician(&pool, &assignment(&request, &tech1)).await.unwrap();

        let updated = update_schedule(
            &pool,
            &schedule.id,
            &UpdateScheduleRequest {
                technician_id: tech2.clone(),
                scheduled_date: NaiveDate::from_ymd_opt(2025, 7, 12).unwrap(),
            },
        )
        .await
        .unwrap();

        assert_eq!(updated.technician_id, tech2);
        assert_eq!(request_status(&pool, &request).await, RequestStatus::Scheduled);
    }

    #[actix_rt::test]
    async fn cancellation_reverts_to_requested_and_requeues() {
        let pool = test_pool().await;
        let customer = insert_user(&pool, "Cust", "customer").await;
        let tech = insert_user(&pool, "Tech", "technician").await;
        let request = insert_request(&pool, &customer).await;
        let schedule = assign_technician(&pool, &assignment(&request, &tech)).await.unwrap();

        cancel_schedule(&pool, &schedule.id).await.unwrap();

        assert_eq!(request_status(&pool, &request).await, RequestStatus::Requested);
        let pending = list_requests_by_status(&pool, &[RequestStatus::Requested])
            .await
            .unwrap();
        assert!(pending.iter().any(|r| r.id == request));
    }

    #[actix_rt::test]
    async fn cancelling_unknown_schedule_is_not_found() {
        let pool = test_pool().await;
        let err = cancel_schedule(&pool, "missing").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
