use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::http::header::HeaderName;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser, Role, StaffUser};
use crate::db::models::Medication;
use crate::error::ApiError;
use crate::state::AppState;
use crate::utils;

const MAX_IMAGE_BYTES: usize = 2 * 1024 * 1024;
const ALLOWED_IMAGE_EXTS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Deserialize)]
pub struct MedicationListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub category: Option<String>,
    pub requires_prescription: Option<bool>,
    pub pharmacy_id: Option<i32>,
}

fn where_or_and(qb: &mut QueryBuilder<'_, Postgres>, any: &mut bool) {
    qb.push(if *any { " AND " } else { " WHERE " });
    *any = true;
}

fn apply_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    query: &MedicationListQuery,
    include_out_of_stock: bool,
) {
    let mut any = false;

    if !include_out_of_stock {
        where_or_and(qb, &mut any);
        qb.push("stock_quantity > 0");
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        where_or_and(qb, &mut any);
        let pattern = format!("%{}%", search);
        qb.push("(name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(category) = query.category.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        where_or_and(qb, &mut any);
        qb.push("category = ").push_bind(category.to_string());
    }
    if let Some(requires) = query.requires_prescription {
        where_or_and(qb, &mut any);
        qb.push("is_prescription_required = ").push_bind(requires);
    }
    if let Some(pharmacy_id) = query.pharmacy_id {
        where_or_and(qb, &mut any);
        qb.push("pharmacy_id = ").push_bind(pharmacy_id);
    }
}

fn total_pages(count: i64, limit: i64) -> i64 {
    if count == 0 {
        0
    } else {
        (count + limit - 1) / limit
    }
}

async fn list_inner(
    pool: &PgPool,
    query: &MedicationListQuery,
    include_out_of_stock: bool,
) -> Result<Json<Value>, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(10).clamp(1, 100);
    let offset = (page - 1) * limit;

    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM medications");
    apply_filters(&mut count_qb, query, include_out_of_stock);
    let total_count: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb = QueryBuilder::new("SELECT * FROM medications");
    apply_filters(&mut qb, query, include_out_of_stock);
    qb.push(" ORDER BY name ASC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);
    let medications: Vec<Medication> = qb.build_query_as().fetch_all(pool).await?;

    Ok(Json(json!({
        "medications": medications,
        "total_count": total_count,
        "current_page": page,
        "total_pages": total_pages(total_count, limit),
    })))
}

/// Authenticated catalog listing; only admins see out-of-stock items.
pub async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<MedicationListQuery>,
) -> Result<Json<Value>, ApiError> {
    list_inner(&state.pool, &query, user.role == Role::Admin).await
}

/// Unauthenticated catalog listing for guests.
pub async fn list_public(
    State(state): State<AppState>,
    Query(query): Query<MedicationListQuery>,
) -> Result<Json<Value>, ApiError> {
    list_inner(&state.pool, &query, false).await
}

#[derive(sqlx::FromRow, Serialize, Debug)]
pub struct MedicationDetail {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub medication: Medication,
    pub pharmacy_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pharmacy_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pharmacy_phone: Option<String>,
}

async fn detail_inner(
    pool: &PgPool,
    id: i32,
    include_pharmacy_contact: bool,
) -> Result<Json<MedicationDetail>, ApiError> {
    let mut detail = sqlx::query_as::<_, MedicationDetail>(
        "SELECT m.*, p.name AS pharmacy_name, p.address AS pharmacy_address,
                p.contact_phone AS pharmacy_phone
         FROM medications m
         LEFT JOIN pharmacies p ON m.pharmacy_id = p.id
         WHERE m.id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("Medication not found".to_string()))?;

    if !include_pharmacy_contact {
        detail.pharmacy_address = None;
        detail.pharmacy_phone = None;
    }

    Ok(Json(detail))
}

pub async fn get(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<MedicationDetail>, ApiError> {
    detail_inner(&state.pool, id, user.role != Role::Customer).await
}

pub async fn get_public(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<MedicationDetail>, ApiError> {
    detail_inner(&state.pool, id, false).await
}

async fn prescription_check_inner(pool: &PgPool, id: i32) -> Result<Json<Value>, ApiError> {
    let requires: Option<bool> =
        sqlx::query_scalar("SELECT is_prescription_required FROM medications WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    let requires =
        requires.ok_or_else(|| ApiError::NotFound("Medication not found".to_string()))?;
    Ok(Json(json!({ "requires_prescription": requires })))
}

pub async fn prescription_check(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    prescription_check_inner(&state.pool, id).await
}

pub async fn prescription_check_public(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    prescription_check_inner(&state.pool, id).await
}

struct StoredImage {
    ext: String,
    data: Bytes,
}

#[derive(Default)]
struct MedicationForm {
    name: Option<String>,
    category: Option<String>,
    dosage: Option<String>,
    price: Option<String>,
    description: Option<String>,
    stock_quantity: Option<String>,
    is_prescription_required: Option<String>,
    pharmacy_id: Option<String>,
    image: Option<StoredImage>,
}

async fn parse_medication_form(mut multipart: Multipart) -> Result<MedicationForm, ApiError> {
    let mut form = MedicationForm::default();

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name == "image" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let ext = utils::file_extension(&file_name)
                .filter(|ext| ALLOWED_IMAGE_EXTS.contains(&ext.as_str()))
                .ok_or_else(|| {
                    ApiError::BadRequest("Image must be a jpeg or png file".to_string())
                })?;
            let data = field.bytes().await?;
            if data.len() > MAX_IMAGE_BYTES {
                return Err(ApiError::BadRequest(
                    "Image exceeds the 2 MiB limit".to_string(),
                ));
            }
            form.image = Some(StoredImage { ext, data });
        } else {
            let value = field.text().await?;
            match name.as_str() {
                "name" => form.name = Some(value),
                "category" => form.category = Some(value),
                "dosage" => form.dosage = Some(value),
                "price" => form.price = Some(value),
                "description" => form.description = Some(value),
                "stock_quantity" => form.stock_quantity = Some(value),
                "is_prescription_required" => form.is_prescription_required = Some(value),
                "pharmacy_id" => form.pharmacy_id = Some(value),
                _ => {}
            }
        }
    }

    Ok(form)
}

fn parse_price(raw: &str) -> Result<f64, ApiError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|price| price.is_finite() && *price > 0.0)
        .ok_or_else(|| ApiError::BadRequest("Price must be a valid positive number".to_string()))
}

fn parse_non_negative(raw: &str, field: &str) -> Result<i32, ApiError> {
    raw.trim()
        .parse::<i32>()
        .ok()
        .filter(|value| *value >= 0)
        .ok_or_else(|| {
            ApiError::BadRequest(format!("{} must be a non-negative integer", field))
        })
}

fn parse_flag(raw: &str) -> Result<bool, ApiError> {
    match raw.trim() {
        "true" | "1" => Ok(true),
        "false" | "0" | "" => Ok(false),
        _ => Err(ApiError::BadRequest(
            "is_prescription_required must be a boolean".to_string(),
        )),
    }
}

async fn store_image(upload_dir: &str, image: &StoredImage) -> Result<String, ApiError> {
    let dir = std::path::Path::new(upload_dir).join("medications");
    tokio::fs::create_dir_all(&dir).await?;
    let file = format!("med-{}.{}", Uuid::new_v4(), image.ext);
    tokio::fs::write(dir.join(&file), &image.data).await?;
    Ok(format!("/uploads/medications/{}", file))
}

/// Adds a medication. New stock goes on the online shelf; the in-person
/// share starts at zero and is managed through the stock endpoint.
pub async fn create(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let form = parse_medication_form(multipart).await?;

    let name = form
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Name is required".to_string()))?
        .to_string();
    let price = parse_price(form.price.as_deref().unwrap_or(""))?;
    let stock_quantity = match form.stock_quantity.as_deref() {
        Some(raw) => parse_non_negative(raw, "Stock")?,
        None => 0,
    };
    let is_prescription_required = match form.is_prescription_required.as_deref() {
        Some(raw) => parse_flag(raw)?,
        None => false,
    };
    let pharmacy_id = match form.pharmacy_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(raw.parse::<i32>().map_err(|_| {
            ApiError::BadRequest("pharmacy_id must be an integer".to_string())
        })?),
        None => admin.pharmacy_id,
    };

    let image_url = match &form.image {
        Some(image) => Some(store_image(&state.config.upload_dir, image).await?),
        None => None,
    };

    let medication = sqlx::query_as::<_, Medication>(
        "INSERT INTO medications (name, category, dosage, price, description,
                                  stock_quantity, online_stock, in_person_stock,
                                  is_prescription_required, image_url, pharmacy_id)
         VALUES ($1, $2, $3, $4, $5, $6, $6, 0, $7, $8, $9)
         RETURNING *",
    )
    .bind(&name)
    .bind(&form.category)
    .bind(&form.dosage)
    .bind(price)
    .bind(&form.description)
    .bind(stock_quantity)
    .bind(is_prescription_required)
    .bind(&image_url)
    .bind(pharmacy_id)
    .fetch_one(&state.pool)
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Medication added successfully",
            "medication": medication,
        })),
    ))
}

/// Partial update over the allowed field list, plus an optional replacement
/// image. Resetting `stock_quantity` re-derives the online share so the
/// online/in-person split always sums to the total.
pub async fn update(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<i32>,
    multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let form = parse_medication_form(multipart).await?;

    let price = form.price.as_deref().map(parse_price).transpose()?;
    let stock_quantity = form
        .stock_quantity
        .as_deref()
        .map(|raw| parse_non_negative(raw, "Stock"))
        .transpose()?;
    let is_prescription_required = form
        .is_prescription_required
        .as_deref()
        .map(parse_flag)
        .transpose()?;

    if let Some(total) = stock_quantity {
        let in_person: Option<i32> =
            sqlx::query_scalar("SELECT in_person_stock FROM medications WHERE id = $1")
                .bind(id)
                .fetch_optional(&state.pool)
                .await?;
        let in_person =
            in_person.ok_or_else(|| ApiError::NotFound("Medication not found".to_string()))?;
        if total < in_person {
            return Err(ApiError::BadRequest(
                "stock_quantity cannot be below the in-person stock".to_string(),
            ));
        }
    }

    let image_url = match &form.image {
        Some(image) => Some(store_image(&state.config.upload_dir, image).await?),
        None => None,
    };

    let mut qb = QueryBuilder::<Postgres>::new("UPDATE medications SET ");
    let mut any = false;

    fn sep(qb: &mut QueryBuilder<'_, Postgres>, any: &mut bool) {
        if *any {
            qb.push(", ");
        }
        *any = true;
    }

    if let Some(name) = form.name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        sep(&mut qb, &mut any);
        qb.push("name = ").push_bind(name.to_string());
    }
    if let Some(category) = form.category {
        sep(&mut qb, &mut any);
        qb.push("category = ").push_bind(category);
    }
    if let Some(dosage) = form.dosage {
        sep(&mut qb, &mut any);
        qb.push("dosage = ").push_bind(dosage);
    }
    if let Some(price) = price {
        sep(&mut qb, &mut any);
        qb.push("price = ").push_bind(price);
    }
    if let Some(description) = form.description {
        sep(&mut qb, &mut any);
        qb.push("description = ").push_bind(description);
    }
    if let Some(total) = stock_quantity {
        sep(&mut qb, &mut any);
        qb.push("stock_quantity = ")
            .push_bind(total)
            .push(", online_stock = ")
            .push_bind(total)
            .push(" - in_person_stock");
    }
    if let Some(flag) = is_prescription_required {
        sep(&mut qb, &mut any);
        qb.push("is_prescription_required = ").push_bind(flag);
    }
    if let Some(image_url) = image_url {
        sep(&mut qb, &mut any);
        qb.push("image_url = ").push_bind(image_url);
    }

    if !any {
        return Err(ApiError::BadRequest("No valid fields to update".to_string()));
    }

    qb.push(", updated_at = now() WHERE id = ")
        .push_bind(id)
        .push(" RETURNING *");

    let medication: Medication = qb
        .build_query_as()
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| ApiError::NotFound("Medication not found".to_string()))?;

    Ok(Json(json!({
        "message": "Medication updated successfully",
        "medication": medication,
    })))
}

pub async fn remove(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    let exists: Option<i32> = sqlx::query_scalar("SELECT id FROM medications WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?;
    exists.ok_or_else(|| ApiError::NotFound("Medication not found".to_string()))?;

    sqlx::query("DELETE FROM medications WHERE id = $1")
        .bind(id)
        .execute(&state.pool)
        .await?;

    Ok(Json(json!({
        "message": "Medication deleted successfully",
        "deleted_id": id,
    })))
}

#[derive(Deserialize)]
pub struct StockUpdateRequest {
    pub online_stock: Option<i32>,
    pub in_person_stock: Option<i32>,
}

#[derive(sqlx::FromRow, Serialize, Debug)]
pub struct StockLevels {
    pub id: i32,
    pub name: String,
    pub online_stock: i32,
    pub in_person_stock: i32,
    pub stock_quantity: i32,
}

/// Sets the online/in-person stock split. The total is always recomputed as
/// their sum.
pub async fn update_stock(
    State(state): State<AppState>,
    StaffUser(_): StaffUser,
    Path(id): Path<i32>,
    Json(req): Json<StockUpdateRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.online_stock.is_none() && req.in_person_stock.is_none() {
        return Err(ApiError::BadRequest("No stock fields to update".to_string()));
    }
    if req.online_stock.is_some_and(|v| v < 0) || req.in_person_stock.is_some_and(|v| v < 0) {
        return Err(ApiError::BadRequest(
            "Stock values cannot be negative".to_string(),
        ));
    }

    let medication = sqlx::query_as::<_, StockLevels>(
        "UPDATE medications
         SET online_stock = COALESCE($1, online_stock),
             in_person_stock = COALESCE($2, in_person_stock),
             stock_quantity = COALESCE($1, online_stock) + COALESCE($2, in_person_stock),
             updated_at = now()
         WHERE id = $3
         RETURNING id, name, online_stock, in_person_stock, stock_quantity",
    )
    .bind(req.online_stock)
    .bind(req.in_person_stock)
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("Medication not found".to_string()))?;

    Ok(Json(json!({
        "message": "Stock updated successfully",
        "medication": medication,
    })))
}

/// Serves an uploaded medication image by file name.
pub async fn serve_image(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<([(HeaderName, &'static str); 1], Vec<u8>), ApiError> {
    if !utils::is_safe_filename(&file) {
        return Err(ApiError::NotFound("File not found".to_string()));
    }
    let ext = utils::file_extension(&file).unwrap_or_default();
    let path = std::path::Path::new(&state.config.upload_dir)
        .join("medications")
        .join(&file);

    let data = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound("File not found".to_string())
        } else {
            ApiError::Io(e)
        }
    })?;

    Ok(([(header::CONTENT_TYPE, utils::content_type_for(&ext))], data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_parsing() {
        assert_eq!(parse_price("12.50").unwrap(), 12.5);
        assert!(parse_price("0").is_err());
        assert!(parse_price("-3").is_err());
        assert!(parse_price("free").is_err());
        assert!(parse_price("NaN").is_err());
    }

    #[test]
    fn stock_parsing() {
        assert_eq!(parse_non_negative("0", "Stock").unwrap(), 0);
        assert_eq!(parse_non_negative(" 25 ", "Stock").unwrap(), 25);
        assert!(parse_non_negative("-1", "Stock").is_err());
        assert!(parse_non_negative("lots", "Stock").is_err());
    }

    #[test]
    fn flag_parsing() {
        assert!(parse_flag("true").unwrap());
        assert!(parse_flag("1").unwrap());
        assert!(!parse_flag("false").unwrap());
        assert!(!parse_flag("").unwrap());
        assert!(parse_flag("maybe").is_err());
    }

    #[test]
    fn page_math() {
        assert_eq!(total_pages(0, 10), 0);
        assert_eq!(total_pages(1, 10), 1);
        assert_eq!(total_pages(10, 10), 1);
        assert_eq!(total_pages(11, 10), 2);
    }
}
