use axum::extract::{Multipart, Path, State};
use axum::http::header::HeaderName;
use axum::http::{header, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser, Role};
use crate::db::models::Prescription;
use crate::error::ApiError;
use crate::state::AppState;
use crate::utils;

const MAX_PRESCRIPTION_BYTES: usize = 5 * 1024 * 1024;
const ALLOWED_EXTS: [&str; 4] = ["pdf", "jpg", "jpeg", "png"];

/// Uploads a prescription scan for a medication that requires one. The file
/// lands under the upload directory and the row starts out `pending`.
pub async fn upload(
    State(state): State<AppState>,
    user: AuthUser,
    Path(medication_id): Path<i32>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let mut uploaded: Option<(String, axum::body::Bytes)> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("prescription") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let ext = utils::file_extension(&file_name)
            .filter(|ext| ALLOWED_EXTS.contains(&ext.as_str()))
            .ok_or_else(|| {
                ApiError::BadRequest(
                    "Only pdf, jpg, jpeg or png files are accepted".to_string(),
                )
            })?;
        let data = field.bytes().await?;
        if data.len() > MAX_PRESCRIPTION_BYTES {
            return Err(ApiError::BadRequest(
                "File exceeds the 5 MiB limit".to_string(),
            ));
        }
        uploaded = Some((ext, data));
    }

    let (ext, data) =
        uploaded.ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;

    let requires: Option<bool> =
        sqlx::query_scalar("SELECT is_prescription_required FROM medications WHERE id = $1")
            .bind(medication_id)
            .fetch_optional(&state.pool)
            .await?;
    match requires {
        None => return Err(ApiError::NotFound("Medication not found".to_string())),
        Some(false) => {
            return Err(ApiError::BadRequest(
                "This medication does not require a prescription".to_string(),
            ))
        }
        Some(true) => {}
    }

    let dir = std::path::Path::new(&state.config.upload_dir).join("prescriptions");
    tokio::fs::create_dir_all(&dir).await?;
    let file = format!("rx-{}.{}", Uuid::new_v4(), ext);
    tokio::fs::write(dir.join(&file), &data).await?;

    // Path is stored relative to the upload directory.
    let file_path = format!("prescriptions/{}", file);

    let (id, created_at) = sqlx::query_as::<_, (i32, chrono::DateTime<chrono::Utc>)>(
        "INSERT INTO prescriptions (user_id, medication_id, file_path, status)
         VALUES ($1, $2, $3, 'pending')
         RETURNING id, created_at",
    )
    .bind(user.user_id)
    .bind(medication_id)
    .bind(&file_path)
    .fetch_one(&state.pool)
    .await?;

    log::info!("prescription {} uploaded by user {}", id, user.user_id);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Prescription uploaded successfully",
            "prescription": { "id": id, "created_at": created_at },
        })),
    ))
}

#[derive(sqlx::FromRow, serde::Serialize, Debug)]
pub struct PrescriptionWithNames {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub prescription: Prescription,
    pub medication_name: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

pub async fn my(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Value>, ApiError> {
    let prescriptions = sqlx::query_as::<_, PrescriptionWithNames>(
        "SELECT p.*, m.name AS medication_name, NULL::text AS user_name,
                NULL::text AS user_email
         FROM prescriptions p
         JOIN medications m ON p.medication_id = m.id
         WHERE p.user_id = $1
         ORDER BY p.created_at DESC",
    )
    .bind(user.user_id)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(json!({ "prescriptions": prescriptions })))
}

pub async fn all(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<Value>, ApiError> {
    let prescriptions = sqlx::query_as::<_, PrescriptionWithNames>(
        "SELECT p.*, m.name AS medication_name, u.full_name AS user_name,
                u.email AS user_email
         FROM prescriptions p
         JOIN users u ON p.user_id = u.id
         JOIN medications m ON p.medication_id = m.id
         ORDER BY p.created_at DESC",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(json!({ "prescriptions": prescriptions })))
}

pub async fn details(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<i32>,
) -> Result<Json<Value>, ApiError> {
    let prescription = sqlx::query_as::<_, PrescriptionWithNames>(
        "SELECT p.*, m.name AS medication_name, u.full_name AS user_name,
                u.email AS user_email
         FROM prescriptions p
         JOIN users u ON p.user_id = u.id
         JOIN medications m ON p.medication_id = m.id
         WHERE p.id = $1",
    )
    .bind(id)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| ApiError::NotFound("Prescription not found".to_string()))?;

    Ok(Json(json!({ "prescription": prescription })))
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    #[serde(default)]
    pub status: String,
    pub notes: Option<String>,
}

/// Approves or rejects a pending prescription. A prescription is reviewed
/// exactly once; the guarded UPDATE refuses a second pass.
pub async fn update_status(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Path(id): Path<i32>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.status != "approved" && req.status != "rejected" {
        return Err(ApiError::BadRequest(
            "Status must be approved or rejected".to_string(),
        ));
    }

    let updated = sqlx::query_as::<_, Prescription>(
        "UPDATE prescriptions
         SET status = $1,
             notes = $2,
             pharmacist_id = $3,
             updated_at = now()
         WHERE id = $4 AND status = 'pending'
         RETURNING *",
    )
    .bind(&req.status)
    .bind(&req.notes)
    .bind(admin.user_id)
    .bind(id)
    .fetch_optional(&state.pool)
    .await?;

    match updated {
        Some(prescription) => Ok(Json(json!({
            "message": format!("Prescription {}", req.status),
            "prescription": prescription,
        }))),
        None => {
            let exists: Option<String> =
                sqlx::query_scalar("SELECT status FROM prescriptions WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&state.pool)
                    .await?;
            match exists {
                None => Err(ApiError::NotFound("Prescription not found".to_string())),
                Some(_) => Err(ApiError::Conflict(
                    "Prescription has already been reviewed".to_string(),
                )),
            }
        }
    }
}

async fn load_file(
    state: &AppState,
    user: &AuthUser,
    id: i32,
) -> Result<(String, &'static str, Vec<u8>), ApiError> {
    let prescription =
        sqlx::query_as::<_, Prescription>("SELECT * FROM prescriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(&state.pool)
            .await?
            .ok_or_else(|| ApiError::NotFound("Prescription not found".to_string()))?;

    if user.role != Role::Admin && prescription.user_id != user.user_id {
        return Err(ApiError::Forbidden("Access denied".to_string()));
    }

    let path = std::path::Path::new(&state.config.upload_dir).join(&prescription.file_path);
    let data = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::NotFound("File not found".to_string())
        } else {
            ApiError::Io(e)
        }
    })?;

    let file_name = std::path::Path::new(&prescription.file_path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("prescription")
        .to_string();
    let ext = utils::file_extension(&file_name).unwrap_or_default();

    Ok((file_name, utils::content_type_for(&ext), data))
}

pub async fn view_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<([(HeaderName, String); 2], Vec<u8>), ApiError> {
    let (_, content_type, data) = load_file(&state, &user, id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, "inline".to_string()),
        ],
        data,
    ))
}

pub async fn download_file(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<i32>,
) -> Result<([(HeaderName, String); 2], Vec<u8>), ApiError> {
    let (file_name, content_type, data) = load_file(&state, &user, id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name),
            ),
        ],
        data,
    ))
}
