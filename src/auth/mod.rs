use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::models::User;
use crate::error::ApiError;
use crate::state::AppState;
use crate::utils;

const TOKEN_TYPE_USER: &str = "user";
const TOKEN_TYPE_GUEST: &str = "guest";
const GUEST_TOKEN_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Pharmacist,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Pharmacist => "pharmacist",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer" => Ok(Role::Customer),
            "pharmacist" => Ok(Role::Pharmacist),
            "admin" => Ok(Role::Admin),
            other => Err(ApiError::Internal(format!("unknown role: {}", other))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claims carried by a registered user's bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i32,
    pub role: Role,
    pub email: String,
    pub pharmacy_id: Option<i32>,
    pub typ: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by a guest-checkout token: contact details instead of a
/// user id.
#[derive(Debug, Serialize, Deserialize)]
pub struct GuestClaims {
    pub guest_id: String,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub typ: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signing/verification keys derived from the configured secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue_user(&self, user: &User, ttl_minutes: i64) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id,
            role: user.role.parse()?,
            email: user.email.clone(),
            pharmacy_id: user.pharmacy_id,
            typ: TOKEN_TYPE_USER.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(ttl_minutes)).timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn issue_guest(
        &self,
        name: &str,
        phone: &str,
        email: Option<&str>,
    ) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = GuestClaims {
            guest_id: utils::random_hex(32),
            name: name.to_string(),
            phone: phone.to_string(),
            email: email.map(str::to_string),
            typ: TOKEN_TYPE_GUEST.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(GUEST_TOKEN_HOURS)).timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_user(&self, token: &str) -> Result<Claims, ApiError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())?;
        if data.claims.typ != TOKEN_TYPE_USER {
            return Err(ApiError::Unauthorized("Token is not valid".to_string()));
        }
        Ok(data.claims)
    }

    pub fn verify_guest(&self, token: &str) -> Result<GuestClaims, ApiError> {
        let data = decode::<GuestClaims>(token, &self.decoding, &Validation::default())?;
        if data.claims.typ != TOKEN_TYPE_GUEST {
            return Err(ApiError::Unauthorized("Token is not valid".to_string()));
        }
        Ok(data.claims)
    }
}

pub fn hash_password(plain: &str) -> Result<String, ApiError> {
    Ok(bcrypt::hash(plain, bcrypt::DEFAULT_COST)?)
}

pub fn verify_password(plain: &str, hash: &str) -> Result<bool, ApiError> {
    Ok(bcrypt::verify(plain, hash)?)
}

/// Registration password policy: at least 8 characters with uppercase,
/// lowercase, digit and special character.
pub fn password_meets_policy(password: &str) -> bool {
    password.len() >= 8
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| "@$!%*?&".contains(c))
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// An authenticated caller, decoded from the `Authorization` header. The
/// token is trusted as issued; handlers that need fresher data query for it.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i32,
    pub role: Role,
    pub email: String,
    pub pharmacy_id: Option<i32>,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let token = bearer_token(&parts.headers).ok_or_else(|| {
            ApiError::Unauthorized("No token, authorization denied".to_string())
        })?;
        let claims = state.jwt.verify_user(token)?;
        Ok(AuthUser {
            user_id: claims.sub,
            role: claims.role,
            email: claims.email,
            pharmacy_id: claims.pharmacy_id,
        })
    }
}

/// An authenticated caller with the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(ApiError::Forbidden(
                "Unauthorized - admin access required".to_string(),
            ));
        }
        Ok(AdminUser(user))
    }
}

/// An authenticated caller with the admin or pharmacist role.
#[derive(Debug, Clone)]
pub struct StaffUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for StaffUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, ApiError> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role == Role::Customer {
            return Err(ApiError::Forbidden("Unauthorized access".to_string()));
        }
        Ok(StaffUser(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_user(role: &str) -> User {
        User {
            id: 7,
            email: "amina@example.com".to_string(),
            password: String::new(),
            username: "amina".to_string(),
            full_name: "Amina Tesfaye".to_string(),
            role: role.to_string(),
            is_verified: true,
            verification_token: None,
            verification_token_expires: None,
            pharmacy_id: Some(2),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn password_policy() {
        assert!(password_meets_policy("Str0ng!pass"));
        assert!(!password_meets_policy("short1!"));
        assert!(!password_meets_policy("alllowercase1!"));
        assert!(!password_meets_policy("ALLUPPERCASE1!"));
        assert!(!password_meets_policy("NoDigits!!"));
        assert!(!password_meets_policy("NoSpecial11"));
    }

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("Str0ng!pass").unwrap();
        assert!(verify_password("Str0ng!pass", &hash).unwrap());
        assert!(!verify_password("Wr0ng!pass", &hash).unwrap());
    }

    #[test]
    fn user_token_round_trip() {
        let keys = JwtKeys::new("test-secret");
        let token = keys.issue_user(&sample_user("pharmacist"), 15).unwrap();
        let claims = keys.verify_user(&token).unwrap();
        assert_eq!(claims.sub, 7);
        assert_eq!(claims.role, Role::Pharmacist);
        assert_eq!(claims.pharmacy_id, Some(2));
    }

    #[test]
    fn guest_token_round_trip() {
        let keys = JwtKeys::new("test-secret");
        let token = keys
            .issue_guest("Samuel Girma", "15550100000", Some("samuel@example.com"))
            .unwrap();
        let claims = keys.verify_guest(&token).unwrap();
        assert_eq!(claims.phone, "15550100000");
        assert_eq!(claims.email.as_deref(), Some("samuel@example.com"));
    }

    #[test]
    fn guest_token_is_not_a_user_token() {
        let keys = JwtKeys::new("test-secret");
        let token = keys.issue_guest("Samuel Girma", "15550100000", None).unwrap();
        assert!(keys.verify_user(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = JwtKeys::new("test-secret");
        let token = keys.issue_user(&sample_user("customer"), -5).unwrap();
        assert!(keys.verify_user(&token).is_err());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let keys = JwtKeys::new("test-secret");
        let other = JwtKeys::new("other-secret");
        let token = keys.issue_user(&sample_user("admin"), 15).unwrap();
        assert!(other.verify_user(&token).is_err());
    }
}
