use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct User {
    pub id: i32,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub username: String,
    pub full_name: String,
    pub role: String,
    pub is_verified: bool,
    #[serde(skip_serializing)]
    pub verification_token: Option<String>,
    #[serde(skip_serializing)]
    pub verification_token_expires: Option<DateTime<Utc>>,
    pub pharmacy_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct Pharmacy {
    pub id: i32,
    pub name: String,
    pub address: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct Medication {
    pub id: i32,
    pub name: String,
    pub category: Option<String>,
    pub dosage: Option<String>,
    pub price: f64,
    pub description: Option<String>,
    pub stock_quantity: i32,
    pub online_stock: i32,
    pub in_person_stock: i32,
    pub is_prescription_required: bool,
    pub image_url: Option<String>,
    pub pharmacy_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct Order {
    pub id: i32,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub customer_notes: Option<String>,
    pub pharmacy_id: i32,
    pub user_id: Option<i32>,
    pub order_type: String,
    pub confirmation_code: String,
    pub is_guest_order: bool,
    pub total_price: f64,
    pub total_number_of_items: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct OrderItem {
    pub id: i32,
    pub order_id: i32,
    pub medication_id: i32,
    pub quantity: i32,
    pub price_per_unit: f64,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct Prescription {
    pub id: i32,
    pub user_id: i32,
    pub medication_id: i32,
    pub file_path: String,
    pub status: String,
    pub pharmacist_id: Option<i32>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Debug, Clone)]
pub struct CartItem {
    pub user_id: i32,
    pub medication_id: i32,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
