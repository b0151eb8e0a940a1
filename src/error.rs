// src/error.rs
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    InternalServerError(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
    AuthError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
            ApiError::AuthError(msg) => write!(f, "Auth Error: {}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        match self {
            ApiError::BadRequest(_) => HttpResponse::BadRequest().json(error_response),
            ApiError::NotFound(_) => HttpResponse::NotFound().json(error_response),
            ApiError::Unauthorized(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::Forbidden(_) => HttpResponse::Forbidden().json(error_response),
            ApiError::Conflict(_) => HttpResponse::Conflict().json(error_response),
            ApiError::ValidationError(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::DatabaseError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::AuthError(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::InternalServerError(_) => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        // Unique-constraint violations surface as Conflict; everything else
        // is a storage failure whose transaction already rolled back.
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.message().contains("UNIQUE constraint failed") {
                return ApiError::Conflict(db_err.message().to_string());
            }
            if db_err.message().contains("FOREIGN KEY constraint failed") {
                return ApiError::BadRequest("Referenced entity does not exist".to_string());
            }
        }
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

// Entity-specific helpers
impl ApiError {
    pub fn bad_request(msg: &str) -> Self {
        ApiError::BadRequest(msg.to_string())
    }

    pub fn not_found(entity: &str) -> Self {
        ApiError::NotFound(format!("{} not found", entity))
    }

    pub fn request_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Service request '{}' not found", id))
    }

    pub fn schedule_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Schedule '{}' not found", id))
    }

    pub fn sample_not_found(code: &str) -> Self {
        ApiError::NotFound(format!("Sample '{}' not found in field logs", code))
    }

    pub fn report_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Report '{}' not found", id))
    }

    pub fn schedule_already_exists(request_id: &str) -> Self {
        ApiError::Conflict(format!(
            "Request '{}' already has an active schedule",
            request_id
        ))
    }

    pub fn sample_already_logged(code: &str) -> Self {
        ApiError::Conflict(format!("Sample '{}' is already logged", code))
    }

    pub fn email_taken(email: &str) -> Self {
        ApiError::Conflict(format!("Email '{}' is already registered", email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = ApiError::sample_not_found("S-99");
        assert!(err.to_string().contains("Not Found"));
        assert!(err.to_string().contains("S-99"));
    }

    #[test]
    fn helper_constructors_pick_the_right_kind() {
        assert!(matches!(
            ApiError::schedule_already_exists("r-1"),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            ApiError::request_not_found("r-1"),
            ApiError::NotFound(_)
        ));
    }
}
