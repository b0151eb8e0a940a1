// src/handlers.rs - Common response envelope and service health
use actix_web::HttpResponse;
use serde::Serialize;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::AppState;

// ==================== COMMON STRUCTURES ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn success_with_message(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message),
        }
    }
}

// ==================== HEALTH ====================

pub async fn health_check(app_state: actix_web::web::Data<Arc<AppState>>) -> ApiResult<HttpResponse> {
    // One cheap query so the probe also covers the database
    sqlx::query("SELECT 1")
        .execute(&app_state.db_pool)
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(serde_json::json!({
        "status": "ok",
        "service": "esp",
    }))))
}
