use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::models::Pharmacy;
use crate::error::ApiError;
use crate::handlers::orders;
use crate::state::AppState;
use crate::utils;

#[derive(Deserialize)]
pub struct GuestCheckoutRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    pub email: Option<String>,
}

/// Starts a guest checkout: validates contact details and hands back a
/// short-lived signed token carrying them.
pub async fn initiate(
    State(state): State<AppState>,
    Json(req): Json<GuestCheckoutRequest>,
) -> Result<Json<Value>, ApiError> {
    let name = req.name.trim();
    if name.len() < 2 || req.phone.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Name and phone number are required for guest checkout".to_string(),
        ));
    }

    let phone = utils::normalize_phone(&req.phone);
    if !utils::is_valid_phone(&phone) {
        return Err(ApiError::BadRequest(
            "Please provide a valid phone number".to_string(),
        ));
    }

    let email = req
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_lowercase);

    // An email that already belongs to an account must go through login.
    if let Some(email) = &email {
        let existing: Option<i32> = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&state.pool)
            .await?;
        if existing.is_some() {
            return Err(ApiError::BadRequest(format!(
                "An account with email {} already exists. Please login instead.",
                email
            )));
        }
    }

    let guest_token = state.jwt.issue_guest(name, &phone, email.as_deref())?;

    Ok(Json(json!({
        "message": "Guest session created successfully",
        "guest_token": guest_token,
        "guest_data": {
            "name": name,
            "phone": phone,
            "email": email,
        },
    })))
}

/// Looks up a guest order by its confirmation code.
pub async fn order_status(
    State(state): State<AppState>,
    Path(confirmation_code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let order = orders::fetch_order_with_pharmacy(&state.pool, &confirmation_code)
        .await?
        .filter(|o| o.order.is_guest_order)
        .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;

    let items = orders::fetch_order_items(&state.pool, order.order.id).await?;

    Ok(Json(json!({
        "order": order,
        "items": items,
        "is_guest_order": true,
    })))
}

pub async fn pharmacies(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pharmacies =
        sqlx::query_as::<_, Pharmacy>("SELECT * FROM pharmacies ORDER BY name")
            .fetch_all(&state.pool)
            .await?;

    Ok(Json(json!({ "pharmacies": pharmacies })))
}
