// src/request_handlers.rs - Service request creation and queue views
//
// Creation is the only write here and touches no other store; every later
// status change arrives through the coordinated writes in the schedule,
// field, lab and reporting modules.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{get_current_user, require_admin, require_staff};
use crate::error::ApiResult;
use crate::handlers::ApiResponse;
use crate::models::{CreateRequestRequest, RequestStatus, RequestSummary, ServiceRequest};
use crate::AppState;

// ==================== CORE OPERATIONS ====================

pub async fn create_request(
    pool: &SqlitePool,
    owner_user_id: &str,
    payload: &CreateRequestRequest,
) -> ApiResult<ServiceRequest> {
    let request = ServiceRequest {
        id: Uuid::new_v4().to_string(),
        user_id: owner_user_id.to_string(),
        service_type: payload.service_type.clone(),
        location: payload.location.clone(),
        preferred_date: payload.preferred_date,
        status: RequestStatus::Requested,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO service_requests
         (id, user_id, service_type, location, preferred_date, status, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&request.id)
    .bind(&request.user_id)
    .bind(&request.service_type)
    .bind(&request.location)
    .bind(request.preferred_date)
    .bind(request.status)
    .bind(request.created_at)
    .execute(pool)
    .await?;

    log::info!("User {} created service request {}", owner_user_id, request.id);
    Ok(request)
}

pub async fn list_requests_for_user(
    pool: &SqlitePool,
    owner_user_id: &str,
) -> ApiResult<Vec<ServiceRequest>> {
    let requests = sqlx::query_as::<_, ServiceRequest>(
        "SELECT * FROM service_requests WHERE user_id = ? ORDER BY created_at DESC",
    )
    .bind(owner_user_id)
    .fetch_all(pool)
    .await?;
    Ok(requests)
}

/// Queue views joined with the requester's name, oldest first so the queue
/// is worked in arrival order.
pub async fn list_requests_by_status(
    pool: &SqlitePool,
    statuses: &[RequestStatus],
) -> ApiResult<Vec<RequestSummary>> {
    let placeholders = vec!["?"; statuses.len()].join(", ");
    let sql = format!(
        "SELECT sr.id, sr.service_type, sr.location, sr.status, up.name AS customer_name, sr.created_at
         FROM service_requests sr
         JOIN users up ON sr.user_id = up.id
         WHERE sr.status IN ({})
         ORDER BY sr.created_at ASC",
        placeholders
    );

    let mut query = sqlx::query_as::<_, RequestSummary>(&sql);
    for status in statuses {
        query = query.bind(*status);
    }
    Ok(query.fetch_all(pool).await?)
}

// ==================== HTTP HANDLERS ====================

pub async fn create_request_handler(
    app_state: web::Data<Arc<AppState>>,
    payload: web::Json<CreateRequestRequest>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    payload.validate()?;

    let request = create_request(&app_state.db_pool, &claims.sub, &payload).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success(request)))
}

pub async fn list_my_requests(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let requests = list_requests_for_user(&app_state.db_pool, &claims.sub).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(requests)))
}

/// Requests waiting for a technician assignment.
pub async fn list_pending_requests(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_admin(&http_request)?;
    let requests =
        list_requests_by_status(&app_state.db_pool, &[RequestStatus::Requested]).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(requests)))
}

/// Requests still in the intake half of the lifecycle.
pub async fn list_active_requests(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_admin(&http_request)?;
    let requests = list_requests_by_status(
        &app_state.db_pool,
        &[RequestStatus::Requested, RequestStatus::Scheduled],
    )
    .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(requests)))
}

/// Requests with an assigned technician, for the field work board.
pub async fn list_scheduled_requests(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    require_staff(&http_request)?;
    let requests =
        list_requests_by_status(&app_state.db_pool, &[RequestStatus::Scheduled]).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(requests)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;
    use chrono::NaiveDate;

    fn payload() -> CreateRequestRequest {
        CreateRequestRequest {
            service_type: "Emission Testing".to_string(),
            location: "Stack 2, North Plant".to_string(),
            preferred_date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
        }
    }

    #[actix_rt::test]
    async fn new_requests_start_in_requested() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "Customer A", "customer").await;

        let request = create_request(&pool, &user, &payload()).await.unwrap();

        assert_eq!(request.status, RequestStatus::Requested);
        assert_eq!(request_status(&pool, &request.id).await, RequestStatus::Requested);
    }

    #[actix_rt::test]
    async fn listing_is_scoped_to_the_owner() {
        let pool = test_pool().await;
        let alice = insert_user(&pool, "Alice", "customer").await;
        let bob = insert_user(&pool, "Bob", "customer").await;
        create_request(&pool, &alice, &payload()).await.unwrap();
        create_request(&pool, &alice, &payload()).await.unwrap();
        create_request(&pool, &bob, &payload()).await.unwrap();

        let mine = list_requests_for_user(&pool, &alice).await.unwrap();
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|r| r.user_id == alice));
    }

    #[actix_rt::test]
    async fn status_views_join_the_customer_name() {
        let pool = test_pool().await;
        let user = insert_user(&pool, "Dian Kusuma", "customer").await;
        create_request(&pool, &user, &payload()).await.unwrap();

        let pending =
            list_requests_by_status(&pool, &[RequestStatus::Requested]).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].customer_name, "Dian Kusuma");

        let scheduled =
            list_requests_by_status(&pool, &[RequestStatus::Scheduled]).await.unwrap();
        assert!(scheduled.is_empty());
    }
}
