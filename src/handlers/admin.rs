use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{Postgres, QueryBuilder};

use crate::auth::AdminUser;
use crate::db::models::Order;
use crate::error::ApiError;
use crate::handlers::orders;
use crate::state::AppState;

#[derive(sqlx::FromRow, Serialize, Debug)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// Aggregate order counters for the dashboard. The independent scalar
/// queries run concurrently on the pool.
pub async fn dashboard_stats(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Value>, ApiError> {
    let pool = &state.pool;

    let total_orders =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM orders").fetch_one(pool);
    let todays_orders = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM orders WHERE created_at::date = CURRENT_DATE",
    )
    .fetch_one(pool);
    let pending_orders = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM orders WHERE status = 'pending'",
    )
    .fetch_one(pool);
    let total_revenue = sqlx::query_scalar::<_, f64>(
        "SELECT COALESCE(SUM(total_price), 0) FROM orders WHERE status <> 'cancelled'",
    )
    .fetch_one(pool);
    let todays_revenue = sqlx::query_scalar::<_, f64>(
        "SELECT COALESCE(SUM(total_price), 0) FROM orders
         WHERE created_at::date = CURRENT_DATE AND status <> 'cancelled'",
    )
    .fetch_one(pool);
    let avg_order_value = sqlx::query_scalar::<_, f64>(
        "SELECT COALESCE(AVG(total_price), 0) FROM orders WHERE status <> 'cancelled'",
    )
    .fetch_one(pool);

    let (total_orders, todays_orders, pending_orders, total_revenue, todays_revenue, avg_order_value) =
        futures::try_join!(
            total_orders,
            todays_orders,
            pending_orders,
            total_revenue,
            todays_revenue,
            avg_order_value
        )?;

    let status_breakdown = sqlx::query_as::<_, StatusCount>(
        "SELECT status, COUNT(*) AS count FROM orders GROUP BY status ORDER BY count DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(Json(json!({
        "stats": {
            "total_orders": total_orders,
            "todays_orders": todays_orders,
            "pending_orders": pending_orders,
            "total_revenue": total_revenue,
            "todays_revenue": todays_revenue,
            "avg_order_value": avg_order_value,
        },
        "status_breakdown": status_breakdown,
    })))
}

#[derive(Deserialize)]
pub struct AdminOrdersQuery {
    pub status: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(sqlx::FromRow, Serialize, Debug)]
pub struct AdminOrderRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub order: Order,
    pub pharmacy_name: Option<String>,
    pub pharmacy_address: Option<String>,
    pub item_count: i64,
}

pub async fn list_orders(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(query): Query<AdminOrdersQuery>,
) -> Result<Json<Value>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let offset = (page - 1) * limit;
    let status = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "all");

    let mut qb = QueryBuilder::<Postgres>::new(
        "SELECT o.*, p.name AS pharmacy_name, p.address AS pharmacy_address,
                COUNT(oi.id) AS item_count
         FROM orders o
         LEFT JOIN pharmacies p ON o.pharmacy_id = p.id
         LEFT JOIN order_items oi ON o.id = oi.order_id",
    );
    if let Some(status) = status {
        qb.push(" WHERE o.status = ").push_bind(status.to_string());
    }
    qb.push(" GROUP BY o.id, p.id ORDER BY o.created_at DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let rows: Vec<AdminOrderRow> = qb.build_query_as().fetch_all(&state.pool).await?;

    let mut count_qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM orders o");
    if let Some(status) = status {
        count_qb.push(" WHERE o.status = ").push_bind(status.to_string());
    }
    let total_orders: i64 = count_qb.build_query_scalar().fetch_one(&state.pool).await?;

    let total_pages = if total_orders == 0 {
        0
    } else {
        (total_orders + limit - 1) / limit
    };

    Ok(Json(json!({
        "orders": rows,
        "pagination": {
            "current_page": page,
            "total_pages": total_pages,
            "total_orders": total_orders,
            "has_next": page * limit < total_orders,
            "has_prev": page > 1,
        },
    })))
}

#[derive(Deserialize)]
pub struct StatusUpdateRequest {
    pub status: Option<String>,
}

/// Moves an order along the fulfillment flow. The new status must be known
/// and reachable from the current one; the row is locked while checking so
/// two concurrent updates cannot both pass the guard.
pub async fn update_order_status(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<i32>,
    Json(req): Json<StatusUpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    let status = req
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Status is required".to_string()))?;

    if !orders::is_known_status(status) {
        return Err(ApiError::BadRequest("Invalid status".to_string()));
    }

    let mut tx = state.pool.begin().await?;

    let current: Option<String> =
        sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
    let current = current.ok_or_else(|| ApiError::NotFound("Order not found".to_string()))?;

    if !orders::transition_allowed(&current, status) {
        return Err(ApiError::Conflict(format!(
            "Cannot move order from {} to {}",
            current, status
        )));
    }

    let order = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = $1, updated_at = now() WHERE id = $2 RETURNING *",
    )
    .bind(status)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    log::info!("order {} moved from {} to {}", id, current, status);

    Ok(Json(json!({
        "message": format!("Order {} status updated to {}", id, status),
        "order": order,
    })))
}
