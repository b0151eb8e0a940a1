// src/auth.rs - JWT identity collaborator: token issuance/verification and role checks
use actix_web::{dev::ServiceRequest, web, HttpMessage, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use validator::Validate;

use crate::error::{ApiError, ApiResult};

// ======== USER MODEL ========

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub organization: Option<String>,
    pub role: String,
    pub created_at: DateTime<Utc>,
}

// ======== USER ROLE ========

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Technician,
    Customer,
}

impl UserRole {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "technician" => Some(UserRole::Technician),
            "customer" => Some(UserRole::Customer),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Technician => "technician",
            UserRole::Customer => "customer",
        }
    }

    /// Staff: back-office and field personnel.
    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Technician)
    }

    pub fn can_schedule(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    pub fn can_generate_reports(&self) -> bool {
        matches!(self, UserRole::Admin)
    }

    pub fn can_manage_field_data(&self) -> bool {
        self.is_staff()
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ======== REQUEST/RESPONSE STRUCTS ========

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 255, message = "Name must be 1-255 characters"))]
    pub name: String,
    #[validate(length(max = 255, message = "Organization cannot exceed 255 characters"))]
    pub organization: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
    pub user: UserInfo,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub name: String,
    pub organization: Option<String>,
    pub role: UserRole,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        let role = UserRole::from_str(&user.role).unwrap_or(UserRole::Customer);
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            organization: user.organization,
            role,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub name: String,
    pub role: UserRole,
    pub exp: i64,
    pub iat: i64,
}

// ======== AUTH SERVICE ========

pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_hours: i64,
}

impl AuthService {
    pub fn new(jwt_secret: &str, token_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_hours,
        }
    }

    pub fn hash_password(&self, password: &str) -> ApiResult<String> {
        hash(password, bcrypt::DEFAULT_COST)
            .map_err(|_| ApiError::InternalServerError("Failed to hash password".to_string()))
    }

    pub fn verify_password(&self, password: &str, password_hash: &str) -> bool {
        verify(password, password_hash).unwrap_or(false)
    }

    pub fn generate_token(&self, user: &User) -> ApiResult<String> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.token_hours);

        let claims = Claims {
            sub: user.id.clone(),
            name: user.name.clone(),
            role: UserRole::from_str(&user.role).unwrap_or(UserRole::Customer),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| ApiError::AuthError("Failed to generate token".to_string()))
    }

    pub fn verify_token(&self, token: &str) -> ApiResult<Claims> {
        let validation = Validation::default();
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::AuthError("Token expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidToken => {
                    ApiError::AuthError("Invalid token".to_string())
                }
                _ => ApiError::AuthError("Token verification failed".to_string()),
            })
    }
}

// ======== USER LOOKUPS ========

impl User {
    pub async fn find_by_email(pool: &SqlitePool, email: &str) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(pool)
            .await
            .map_err(|_| ApiError::NotFound("User not found".to_string()))
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> ApiResult<User> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .map_err(|_| ApiError::NotFound("User not found".to_string()))
    }
}

// ======== HELPER FUNCTIONS ========

pub fn get_current_user(req: &HttpRequest) -> ApiResult<Claims> {
    req.extensions()
        .get::<Claims>()
        .cloned()
        .ok_or_else(|| ApiError::Unauthorized("No user information found".to_string()))
}

/// Claims for the caller, rejected with Forbidden unless the role check passes.
pub fn require_role(req: &HttpRequest, check: fn(&UserRole) -> bool) -> ApiResult<Claims> {
    let claims = get_current_user(req)?;
    if check(&claims.role) {
        Ok(claims)
    } else {
        Err(ApiError::Forbidden("Insufficient permissions".to_string()))
    }
}

pub fn require_admin(req: &HttpRequest) -> ApiResult<Claims> {
    require_role(req, |role| matches!(role, UserRole::Admin))
}

pub fn require_staff(req: &HttpRequest) -> ApiResult<Claims> {
    require_role(req, UserRole::is_staff)
}

// ======== JWT MIDDLEWARE ========

pub async fn jwt_middleware(
    req: ServiceRequest,
    credentials: BearerAuth,
) -> Result<ServiceRequest, (actix_web::Error, ServiceRequest)> {
    let token = credentials.token();

    let auth_service = match req.app_data::<web::Data<std::sync::Arc<AuthService>>>() {
        Some(svc) => svc,
        None => {
            log::error!("AuthService not found in app data");
            return Err((
                ApiError::InternalServerError("Auth service not available".to_string()).into(),
                req,
            ));
        }
    };

    match auth_service.verify_token(token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(req)
        }
        Err(err) => {
            log::warn!("JWT verification failed: {}", err);
            Err((err.into(), req))
        }
    }
}
