// src/auth_handlers.rs - Account registration, login and the admin seed
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use rand::Rng;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{
    get_current_user, AuthService, LoginRequest, LoginResponse, RegisterRequest, User, UserInfo,
    UserRole,
};
use crate::error::{ApiError, ApiResult};
use crate::handlers::ApiResponse;
use crate::AppState;

// ==================== CORE OPERATIONS ====================

/// Self-service registration always creates a customer account; staff roles
/// are provisioned out of band.
pub async fn register_user(
    pool: &SqlitePool,
    auth_service: &AuthService,
    payload: &RegisterRequest,
) -> ApiResult<User> {
    let user = User {
        id: Uuid::new_v4().to_string(),
        email: payload.email.to_lowercase(),
        password_hash: auth_service.hash_password(&payload.password)?,
        name: payload.name.clone(),
        organization: payload.organization.clone(),
        role: UserRole::Customer.as_str().to_string(),
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, name, organization, role, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&user.id)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(&user.name)
    .bind(&user.organization)
    .bind(&user.role)
    .bind(user.created_at)
    .execute(pool)
    .await
    .map_err(|err| match ApiError::from(err) {
        ApiError::Conflict(_) => ApiError::email_taken(&user.email),
        other => other,
    })?;

    log::info!("Registered customer account {}", user.email);
    Ok(user)
}

pub async fn login_user(
    pool: &SqlitePool,
    auth_service: &AuthService,
    token_hours: i64,
    payload: &LoginRequest,
) -> ApiResult<LoginResponse> {
    let user = User::find_by_email(pool, &payload.email.to_lowercase())
        .await
        .map_err(|_| ApiError::Unauthorized("Invalid email or password".to_string()))?;

    if !auth_service.verify_password(&payload.password, &user.password_hash) {
        return Err(ApiError::Unauthorized(
            "Invalid email or password".to_string(),
        ));
    }

    let token = auth_service.generate_token(&user)?;
    Ok(LoginResponse {
        token,
        expires_in: token_hours * 3600,
        user: UserInfo::from(user),
    })
}

/// Seeds an admin account when the users table is empty, so a fresh install
/// has a way in. The generated password is printed once and never stored in
/// the clear.
pub async fn create_default_admin_if_needed(
    pool: &SqlitePool,
    auth_service: &AuthService,
) -> ApiResult<()> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }

    let password: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();

    sqlx::query(
        "INSERT INTO users (id, email, password_hash, name, organization, role, created_at)
         VALUES (?, ?, ?, ?, NULL, 'admin', ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind("admin@esp.local")
    .bind(auth_service.hash_password(&password)?)
    .bind("Administrator")
    .bind(Utc::now())
    .execute(pool)
    .await?;

    log::warn!(
        "Created default admin account admin@esp.local with password: {}",
        password
    );
    log::warn!("Change this password immediately after first login");
    Ok(())
}

// ==================== HTTP HANDLERS ====================

pub async fn register_handler(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    payload: web::Json<RegisterRequest>,
) -> ApiResult<HttpResponse> {
    payload.validate()?;

    let user = register_user(&app_state.db_pool, &auth_service, &payload).await?;
    Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
        UserInfo::from(user),
        "Account created".to_string(),
    )))
}

pub async fn login_handler(
    app_state: web::Data<Arc<AppState>>,
    auth_service: web::Data<Arc<AuthService>>,
    payload: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    payload.validate()?;

    let response = login_user(
        &app_state.db_pool,
        &auth_service,
        app_state.config.auth.token_expiration_hours,
        &payload,
    )
    .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(response)))
}

pub async fn me_handler(
    app_state: web::Data<Arc<AppState>>,
    http_request: HttpRequest,
) -> ApiResult<HttpResponse> {
    let claims = get_current_user(&http_request)?;
    let user = User::find_by_id(&app_state.db_pool, &claims.sub).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(UserInfo::from(user))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;

    fn service() -> AuthService {
        AuthService::new("test-secret-at-least-32-characters!!", 24)
    }

    fn register_payload(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "hunter2hunter2".to_string(),
            name: "Cust One".to_string(),
            organization: Some("Acme".to_string()),
        }
    }

    #[actix_rt::test]
    async fn registered_user_can_log_in() {
        let pool = test_pool().await;
        let auth = service();

        let user = register_user(&pool, &auth, &register_payload("cust@acme.test"))
            .await
            .unwrap();
        assert_eq!(user.role, "customer");

        let response = login_user(
            &pool,
            &auth,
            24,
            &LoginRequest {
                email: "cust@acme.test".to_string(),
                password: "hunter2hunter2".to_string(),
            },
        )
        .await
        .unwrap();

        let claims = auth.verify_token(&response.token).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, UserRole::Customer);
        assert_eq!(response.expires_in, 24 * 3600);
    }

    #[actix_rt::test]
    async fn duplicate_email_is_conflict() {
        let pool = test_pool().await;
        let auth = service();

        register_user(&pool, &auth, &register_payload("cust@acme.test"))
            .await
            .unwrap();
        let err = register_user(&pool, &auth, &register_payload("CUST@acme.test"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }

    #[actix_rt::test]
    async fn wrong_password_is_unauthorized() {
        let pool = test_pool().await;
        let auth = service();
        register_user(&pool, &auth, &register_payload("cust@acme.test"))
            .await
            .unwrap();

        let err = login_user(
            &pool,
            &auth,
            24,
            &LoginRequest {
                email: "cust@acme.test".to_string(),
                password: "wrong-password".to_string(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[actix_rt::test]
    async fn admin_seed_runs_once() {
        let pool = test_pool().await;
        let auth = service();

        create_default_admin_if_needed(&pool, &auth).await.unwrap();
        create_default_admin_if_needed(&pool, &auth).await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'admin'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let admin = User::find_by_email(&pool, "admin@esp.local").await.unwrap();
        assert_eq!(admin.role, "admin");
    }
}
