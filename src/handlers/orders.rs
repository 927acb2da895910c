use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::auth;
use crate::db::models::Order;
use crate::error::ApiError;
use crate::state::AppState;
use crate::utils;

/// Legal order-status transitions. Delivery orders travel through
/// `on_the_way`/`delivered`, pickup orders through `ready`/`completed`;
/// anything not yet terminal can be cancelled.
static STATUS_FLOW: phf::Map<&'static str, &'static [&'static str]> = phf::phf_map! {
    "pending" => &["processing", "cancelled"],
    "processing" => &["ready", "on_the_way", "cancelled"],
    "ready" => &["completed", "cancelled"],
    "on_the_way" => &["delivered", "cancelled"],
    "delivered" => &["completed"],
    "completed" => &[],
    "cancelled" => &[],
};

pub fn is_known_status(status: &str) -> bool {
    STATUS_FLOW.contains_key(status)
}

pub fn transition_allowed(from: &str, to: &str) -> bool {
    STATUS_FLOW
        .get(from)
        .map_or(false, |next| next.contains(&to))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub customer_email: Option<String>,
    pub customer_notes: Option<String>,
    pub pharmacy_id: Option<i32>,
    #[serde(default = "default_order_type")]
    pub order_type: String,
    #[serde(default)]
    pub items: Vec<OrderItemRequest>,
    #[serde(default = "default_true")]
    pub is_guest_order: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItemRequest {
    pub medication_id: i32,
    pub quantity: i32,
    pub price: f64,
}

fn default_order_type() -> String {
    "online".to_string()
}

fn default_true() -> bool {
    true
}

fn order_totals(items: &[OrderItemRequest]) -> (f64, i32) {
    let total_price = items
        .iter()
        .map(|item| item.price * item.quantity as f64)
        .sum();
    let total_items = items.iter().map(|item| item.quantity).sum();
    (total_price, total_items)
}

/// Creates an order and decrements stock inside a single transaction. Each
/// line item runs a guarded decrement; a guard that matches zero rows means
/// the shelf ran dry and the whole order rolls back.
pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    // A bearer token is optional here: a registered user's token attaches the
    // order to their account, a guest token fills in missing contact details.
    let bearer = auth::bearer_token(&headers);
    let user_claims = bearer.and_then(|t| state.jwt.verify_user(t).ok());
    let guest_claims = match user_claims {
        Some(_) => None,
        None => bearer.and_then(|t| state.jwt.verify_guest(t).ok()),
    };

    let customer_name = req
        .customer_name
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| guest_claims.as_ref().map(|g| g.name.clone()));
    let customer_phone = req
        .customer_phone
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| guest_claims.as_ref().map(|g| g.phone.clone()));
    let customer_email = req
        .customer_email
        .clone()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| guest_claims.as_ref().and_then(|g| g.email.clone()))
        .or_else(|| user_claims.as_ref().map(|c| c.email.clone()));

    let (Some(customer_name), Some(customer_phone), Some(pharmacy_id)) =
        (customer_name, customer_phone, req.pharmacy_id)
    else {
        return Err(ApiError::BadRequest(
            "Missing required fields: name, phone, pharmacy, and items are required".to_string(),
        ));
    };
    if req.items.is_empty() {
        return Err(ApiError::BadRequest(
            "Missing required fields: name, phone, pharmacy, and items are required".to_string(),
        ));
    }
    for item in &req.items {
        if item.quantity <= 0 {
            return Err(ApiError::BadRequest(
                "Item quantities must be positive".to_string(),
            ));
        }
        if item.price < 0.0 {
            return Err(ApiError::BadRequest(
                "Item prices cannot be negative".to_string(),
            ));
        }
    }

    let user_id = user_claims.as_ref().map(|c| c.sub);
    let is_guest_order = req.is_guest_order && user_id.is_none();
    let confirmation_code = utils::confirmation_code();
    let (total_price, total_items) = order_totals(&req.items);

    let mut tx = state.pool.begin().await?;

    let order = sqlx::query_as::<_, Order>(
        "INSERT INTO orders (customer_name, customer_phone, customer_email,
                             customer_notes, pharmacy_id, user_id, order_type,
                             confirmation_code, is_guest_order, total_price,
                             total_number_of_items, status)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'pending')
         RETURNING *",
    )
    .bind(&customer_name)
    .bind(&customer_phone)
    .bind(&customer_email)
    .bind(&req.customer_notes)
    .bind(pharmacy_id)
    .bind(user_id)
    .bind(&req.order_type)
    .bind(&confirmation_code)
    .bind(is_guest_order)
    .bind(total_price)
    .bind(total_items)
    .fetch_one(&mut *tx)
    .await?;

    for item in &req.items {
        sqlx::query(
            "INSERT INTO order_items (order_id, medication_id, quantity, price_per_unit)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(order.id)
        .bind(item.medication_id)
        .bind(item.quantity)
        .bind(item.price)
        .execute(&mut *tx)
        .await?;

        let decremented = sqlx::query(
            "UPDATE medications
             SET online_stock = online_stock - $1,
                 stock_quantity = stock_quantity - $1,
                 updated_at = now()
             WHERE id = $2 AND online_stock >= $1",
        )
        .bind(item.quantity)
        .bind(item.medication_id)
        .execute(&mut *tx)
        .await?;

        if decremented.rows_affected() == 0 {
            // Dropping the transaction rolls back the order and every
            // decrement applied so far.
            return Err(ApiError::InsufficientStock(item.medication_id));
        }
    }

    tx.commit().await?;
    log::info!("order {} created ({} items)", order.id, total_items);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Order created successfully",
            "order": order,
            "confirmation_code": confirmation_code,
        })),
    ))
}

#[derive(sqlx::FromRow, serde::Serialize, Debug)]
pub struct OrderWithPharmacy {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub order: Order,
    pub pharmacy_name: Option<String>,
    pub pharmacy_address: Option<String>,
    pub pharmacy_phone: Option<String>,
}

#[derive(sqlx::FromRow, serde::Serialize, Debug)]
pub struct OrderItemDetail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub item: crate::db::models::OrderItem,
    pub medication_name: Option<String>,
}

pub(crate) async fn fetch_order_with_pharmacy(
    pool: &PgPool,
    confirmation_code: &str,
) -> Result<Option<OrderWithPharmacy>, sqlx::Error> {
    sqlx::query_as::<_, OrderWithPharmacy>(
        "SELECT o.*, p.name AS pharmacy_name, p.address AS pharmacy_address,
                p.contact_phone AS pharmacy_phone
         FROM orders o
         LEFT JOIN pharmacies p ON o.pharmacy_id = p.id
         WHERE o.confirmation_code = $1",
    )
    .bind(confirmation_code)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn fetch_order_items(
    pool: &PgPool,
    order_id: i32,
) -> Result<Vec<OrderItemDetail>, sqlx::Error> {
    sqlx::query_as::<_, OrderItemDetail>(
        "SELECT oi.*, m.name AS medication_name
         FROM order_items oi
         LEFT JOIN medications m ON oi.medication_id = m.id
         WHERE oi.order_id = $1",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(confirmation_code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let order = fetch_order_with_pharmacy(&state.pool, &confirmation_code)
        .await?
        .ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;

    let items = fetch_order_items(&state.pool, order.order.id).await?;

    let mut body = serde_json::to_value(&order)?;
    body["items"] = serde_json::to_value(&items)?;

    Ok(Json(json!({ "order": body })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindOrdersRequest {
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone: String,
    pub customer_email: Option<String>,
}

pub async fn find_by_customer(
    State(state): State<AppState>,
    Json(req): Json<FindOrdersRequest>,
) -> Result<Json<Value>, ApiError> {
    let name = req.customer_name.trim();
    let phone = req.customer_phone.trim();
    if name.is_empty() || phone.is_empty() {
        return Err(ApiError::BadRequest(
            "Name and phone number are required".to_string(),
        ));
    }

    let email = req
        .customer_email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty());

    let orders = match email {
        Some(email) => {
            sqlx::query_as::<_, OrderWithPharmacy>(
                "SELECT o.*, p.name AS pharmacy_name, p.address AS pharmacy_address,
                        p.contact_phone AS pharmacy_phone
                 FROM orders o
                 LEFT JOIN pharmacies p ON o.pharmacy_id = p.id
                 WHERE o.customer_name ILIKE $1
                   AND o.customer_phone = $2
                   AND o.customer_email ILIKE $3
                 ORDER BY o.created_at DESC
                 LIMIT 10",
            )
            .bind(format!("%{}%", name))
            .bind(phone)
            .bind(format!("%{}%", email))
            .fetch_all(&state.pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, OrderWithPharmacy>(
                "SELECT o.*, p.name AS pharmacy_name, p.address AS pharmacy_address,
                        p.contact_phone AS pharmacy_phone
                 FROM orders o
                 LEFT JOIN pharmacies p ON o.pharmacy_id = p.id
                 WHERE o.customer_name ILIKE $1
                   AND o.customer_phone = $2
                 ORDER BY o.created_at DESC
                 LIMIT 10",
            )
            .bind(format!("%{}%", name))
            .bind(phone)
            .fetch_all(&state.pool)
            .await?
        }
    };

    Ok(Json(json!({
        "orders": orders,
        "count": orders.len(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_statuses() {
        for status in [
            "pending",
            "processing",
            "ready",
            "on_the_way",
            "delivered",
            "completed",
            "cancelled",
        ] {
            assert!(is_known_status(status), "{} should be known", status);
        }
        assert!(!is_known_status("shipped"));
    }

    #[test]
    fn forward_transitions() {
        assert!(transition_allowed("pending", "processing"));
        assert!(transition_allowed("processing", "ready"));
        assert!(transition_allowed("processing", "on_the_way"));
        assert!(transition_allowed("ready", "completed"));
        assert!(transition_allowed("on_the_way", "delivered"));
        assert!(transition_allowed("delivered", "completed"));
    }

    #[test]
    fn no_skipping_or_reversing() {
        assert!(!transition_allowed("pending", "completed"));
        assert!(!transition_allowed("pending", "delivered"));
        assert!(!transition_allowed("ready", "pending"));
        assert!(!transition_allowed("delivered", "on_the_way"));
    }

    #[test]
    fn cancellation_only_before_terminal_states() {
        assert!(transition_allowed("pending", "cancelled"));
        assert!(transition_allowed("processing", "cancelled"));
        assert!(transition_allowed("ready", "cancelled"));
        assert!(transition_allowed("on_the_way", "cancelled"));
        assert!(!transition_allowed("delivered", "cancelled"));
        assert!(!transition_allowed("completed", "cancelled"));
        assert!(!transition_allowed("cancelled", "pending"));
    }

    #[test]
    fn totals_sum_lines() {
        let items = vec![
            OrderItemRequest {
                medication_id: 1,
                quantity: 2,
                price: 4.5,
            },
            OrderItemRequest {
                medication_id: 2,
                quantity: 1,
                price: 10.0,
            },
        ];
        let (price, count) = order_totals(&items);
        assert!((price - 19.0).abs() < f64::EPSILON);
        assert_eq!(count, 3);
    }
}
