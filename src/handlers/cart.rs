use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::AuthUser;
use crate::db::models::Medication;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AddToCartRequest {
    pub medication_id: i32,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// Adds a medication to the caller's cart. A prescription-required
/// medication is gated: it cannot enter the cart until one of the caller's
/// prescriptions for it has been approved.
pub async fn add(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<AddToCartRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if req.quantity <= 0 {
        return Err(ApiError::BadRequest("Quantity must be positive".to_string()));
    }

    let medication =
        sqlx::query_as::<_, Medication>("SELECT * FROM medications WHERE id = $1")
            .bind(req.medication_id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or_else(|| ApiError::NotFound("Medication not found".to_string()))?;

    if medication.stock_quantity <= 0 {
        return Err(ApiError::BadRequest(
            "Medication is out of stock".to_string(),
        ));
    }

    if medication.is_prescription_required {
        let approved: Option<i32> = sqlx::query_scalar(
            "SELECT id FROM prescriptions
             WHERE user_id = $1 AND medication_id = $2 AND status = 'approved'
             LIMIT 1",
        )
        .bind(user.user_id)
        .bind(req.medication_id)
        .fetch_optional(&state.pool)
        .await?;

        if approved.is_none() {
            return Err(ApiError::Forbidden(
                "An approved prescription is required before adding this medication \
                 to your cart"
                    .to_string(),
            ));
        }
    }

    sqlx::query(
        "INSERT INTO cart_items (user_id, medication_id, quantity)
         VALUES ($1, $2, $3)
         ON CONFLICT (user_id, medication_id)
         DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity,
                       updated_at = now()",
    )
    .bind(user.user_id)
    .bind(req.medication_id)
    .bind(req.quantity)
    .execute(&state.pool)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Added to cart" })),
    ))
}

#[derive(sqlx::FromRow, Serialize, Debug)]
pub struct CartLine {
    pub medication_id: i32,
    pub quantity: i32,
    pub name: String,
    pub price: f64,
    pub is_prescription_required: bool,
    pub image_url: Option<String>,
    pub subtotal: f64,
}

pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let items = sqlx::query_as::<_, CartLine>(
        "SELECT ci.medication_id, ci.quantity, m.name, m.price,
                m.is_prescription_required, m.image_url,
                ci.quantity * m.price AS subtotal
         FROM cart_items ci
         JOIN medications m ON ci.medication_id = m.id
         WHERE ci.user_id = $1
         ORDER BY m.name",
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    let total: f64 = items.iter().map(|line| line.subtotal).sum();

    Ok(Json(json!({ "items": items, "total": total })))
}

#[derive(Deserialize)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

/// Sets the quantity for a cart line; zero removes it.
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(medication_id): Path<i32>,
    Json(req): Json<UpdateCartItemRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.quantity < 0 {
        return Err(ApiError::BadRequest(
            "Quantity cannot be negative".to_string(),
        ));
    }

    let affected = if req.quantity == 0 {
        sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND medication_id = $2")
            .bind(user.user_id)
            .bind(medication_id)
            .execute(&state.pool)
            .await?
            .rows_affected()
    } else {
        sqlx::query(
            "UPDATE cart_items SET quantity = $1, updated_at = now()
             WHERE user_id = $2 AND medication_id = $3",
        )
        .bind(req.quantity)
        .bind(user.user_id)
        .bind(medication_id)
        .execute(&state.pool)
        .await?
        .rows_affected()
    };

    if affected == 0 {
        return Err(ApiError::NotFound("Item not in cart".to_string()));
    }

    Ok(Json(json!({ "message": "Cart updated" })))
}
