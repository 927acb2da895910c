use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth;
use crate::db::models::User;
use crate::error::ApiError;
use crate::state::AppState;
use crate::utils;

const VERIFICATION_TOKEN_HOURS: i64 = 24;

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub full_name: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let email = req.email.trim().to_lowercase();
    let username = req.username.trim().to_string();
    let full_name = req.full_name.trim().to_string();

    if email.is_empty() || req.password.is_empty() || username.is_empty() || full_name.is_empty() {
        return Err(ApiError::BadRequest("All fields are required".to_string()));
    }
    if !utils::is_valid_email(&email) {
        return Err(ApiError::BadRequest("Invalid email format".to_string()));
    }
    if username.len() < 3 {
        return Err(ApiError::BadRequest(
            "Username must be at least 3 characters".to_string(),
        ));
    }
    if !auth::password_meets_policy(&req.password) {
        return Err(ApiError::BadRequest(
            "Password must be at least 8 characters and contain uppercase, \
             lowercase, number and special character"
                .to_string(),
        ));
    }

    let existing = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.pool)
        .await?;

    // Verified accounts own their email; an unverified record is overwritten
    // in place.
    if let Some(user) = &existing {
        if user.is_verified {
            return Err(ApiError::BadRequest("Email already in use".to_string()));
        }
    }

    let token = utils::verification_token();
    let expires = Utc::now() + Duration::hours(VERIFICATION_TOKEN_HOURS);
    let hashed = auth::hash_password(&req.password)?;

    let result = if existing.is_some() {
        sqlx::query(
            "UPDATE users
             SET password = $1,
                 username = $2,
                 full_name = $3,
                 verification_token = $4,
                 verification_token_expires = $5,
                 updated_at = now()
             WHERE email = $6",
        )
        .bind(&hashed)
        .bind(&username)
        .bind(&full_name)
        .bind(&token)
        .bind(expires)
        .bind(&email)
        .execute(&state.pool)
        .await
    } else {
        sqlx::query(
            "INSERT INTO users (email, password, username, full_name,
                                verification_token, verification_token_expires)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&email)
        .bind(&hashed)
        .bind(&username)
        .bind(&full_name)
        .bind(&token)
        .bind(expires)
        .execute(&state.pool)
        .await
    };

    if let Err(e) = result {
        if is_unique_violation(&e) {
            return Err(ApiError::BadRequest("Username already exists".to_string()));
        }
        return Err(e.into());
    }

    send_verification_mail(&state, email.clone(), token).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Verification email sent. Please check your inbox.",
            "email": email,
        })),
    ))
}

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(ApiError::BadRequest(
            "Email and password are required".to_string(),
        ));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(req.email.trim().to_lowercase())
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;

    if !auth::verify_password(&req.password, &user.password)? {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }
    if !user.is_verified {
        return Err(ApiError::Forbidden(
            "Email not verified. Please check your inbox.".to_string(),
        ));
    }

    let token = state.jwt.issue_user(&user, state.config.jwt_expiry_minutes)?;
    log::info!("login for user {}", user.id);

    Ok(Json(json!({
        "message": "Login successful",
        "token": token,
        "user": {
            "id": user.id,
            "username": user.username,
            "email": user.email,
            "is_verified": user.is_verified,
            "role": user.role,
            "pharmacy_id": user.pharmacy_id,
        },
    })))
}

#[derive(Deserialize)]
pub struct VerifyEmailQuery {
    pub token: Option<String>,
}

pub async fn verify_email(
    State(state): State<AppState>,
    Query(query): Query<VerifyEmailQuery>,
) -> Result<Json<Value>, ApiError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Verification token is required".to_string()))?;

    let verified = sqlx::query_as::<_, (i32, String)>(
        "UPDATE users
         SET is_verified = TRUE,
             verification_token = NULL,
             verification_token_expires = NULL,
             updated_at = now()
         WHERE verification_token = $1
           AND verification_token_expires > now()
         RETURNING id, email",
    )
    .bind(&token)
    .fetch_optional(&state.pool)
    .await?;

    let (user_id, email) = verified.ok_or_else(|| {
        ApiError::BadRequest("Invalid or expired verification token".to_string())
    })?;

    log::info!("user {} verified", user_id);

    Ok(Json(json!({
        "message": "Email verified successfully",
        "email": email,
    })))
}

#[derive(Deserialize)]
pub struct ResendVerificationRequest {
    #[serde(default)]
    pub email: String,
}

pub async fn resend_verification(
    State(state): State<AppState>,
    Json(req): Json<ResendVerificationRequest>,
) -> Result<Json<Value>, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() {
        return Err(ApiError::BadRequest("Email is required".to_string()));
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    if user.is_verified {
        return Err(ApiError::BadRequest(
            "Email is already verified".to_string(),
        ));
    }

    let token = utils::verification_token();
    let expires = Utc::now() + Duration::hours(VERIFICATION_TOKEN_HOURS);

    sqlx::query(
        "UPDATE users
         SET verification_token = $1,
             verification_token_expires = $2,
             updated_at = now()
         WHERE email = $3",
    )
    .bind(&token)
    .bind(expires)
    .bind(&email)
    .execute(&state.pool)
    .await?;

    send_verification_mail(&state, email, token).await?;

    Ok(Json(json!({
        "message": "Verification email resent successfully",
    })))
}

async fn send_verification_mail(
    state: &AppState,
    email: String,
    token: String,
) -> Result<(), ApiError> {
    let mailer = state.mailer.clone();
    tokio::task::spawn_blocking(move || mailer.send_verification(&email, &token))
        .await
        .map_err(|e| ApiError::Internal(format!("mail task failed: {}", e)))??;
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}
