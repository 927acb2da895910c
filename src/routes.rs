use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::handlers::{admin, auth, cart, guest, medications, orders, prescriptions};
use crate::rate_limit::{self, RateLimiter};
use crate::state::AppState;

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(15 * 60);
const AUTH_RATE_LIMIT: u32 = 5;
const GUEST_RATE_LIMIT: u32 = 10;

// Multipart uploads top out at 5 MiB plus form overhead.
const MAX_BODY_BYTES: usize = 6 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let auth_limiter = RateLimiter::new(AUTH_RATE_LIMIT, RATE_LIMIT_WINDOW);
    let guest_limiter = RateLimiter::new(GUEST_RATE_LIMIT, RATE_LIMIT_WINDOW);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/verify-email", get(auth::verify_email))
        .route("/resend-verification", post(auth::resend_verification))
        .layer(middleware::from_fn_with_state(
            auth_limiter,
            rate_limit::enforce,
        ));

    let guest_limited = Router::new()
        .route("/initiate", post(guest::initiate))
        .route("/order/:confirmation_code", get(guest::order_status))
        .layer(middleware::from_fn_with_state(
            guest_limiter,
            rate_limit::enforce,
        ));

    let guest_routes = Router::new()
        .route("/medications", get(medications::list_public))
        .route("/medications/:id", get(medications::get_public))
        .route(
            "/medications/:id/prescription-check",
            get(medications::prescription_check_public),
        )
        .route("/pharmacies", get(guest::pharmacies))
        .merge(guest_limited);

    let medication_routes = Router::new()
        .route("/", get(medications::list).post(medications::create))
        .route(
            "/:id",
            get(medications::get)
                .put(medications::update)
                .delete(medications::remove),
        )
        .route(
            "/:id/prescription-check",
            get(medications::prescription_check),
        )
        .route("/:id/stock", patch(medications::update_stock))
        .route("/:id/prescriptions", post(prescriptions::upload));

    let order_routes = Router::new()
        .route("/", post(orders::create_order))
        .route("/find-by-customer", post(orders::find_by_customer))
        .route("/:confirmation_code", get(orders::get_order));

    let prescription_routes = Router::new()
        .route("/prescriptions/my", get(prescriptions::my))
        .route("/prescriptions/all", get(prescriptions::all))
        .route("/prescriptions/:id", get(prescriptions::details))
        .route("/prescriptions/:id/status", put(prescriptions::update_status))
        .route("/prescriptions/file/:id/view", get(prescriptions::view_file))
        .route(
            "/prescriptions/file/:id/download",
            get(prescriptions::download_file),
        );

    let cart_routes = Router::new()
        .route("/", get(cart::get_cart))
        .route("/add", post(cart::add))
        .route("/:medication_id", put(cart::update_item));

    let admin_routes = Router::new()
        .route("/dashboard/stats", get(admin::dashboard_stats))
        .route("/orders", get(admin::list_orders))
        .route("/orders/:id/status", patch(admin::update_order_status));

    Router::new()
        .route("/health", get(health))
        .route("/uploads/medications/:file", get(medications::serve_image))
        .nest("/api/auth", auth_routes)
        .nest("/api/guest", guest_routes)
        .nest("/api/medications", medication_routes)
        .nest("/api/orders", order_routes)
        .nest("/api/cart", cart_routes)
        .nest("/api/admin", admin_routes)
        .nest("/api", prescription_routes)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({ "message": "Not found" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use chrono::Utc;
    use envconfig::Envconfig;
    use sqlx::PgPool;
    use std::collections::HashMap;
    use tower::ServiceExt;

    use crate::auth::Role;
    use crate::config::Config;
    use crate::db::models::User;
    use crate::services::mailer::Mailer;

    fn test_config() -> Config {
        let vars: HashMap<String, String> = [
            ("DATABASE_URL", "postgres://localhost/medicart_test"),
            ("JWT_SECRET", "router-test-secret"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Config::init_from_hashmap(&vars).unwrap()
    }

    /// State over a lazy pool: requests rejected before their first query
    /// never touch a database.
    fn test_state() -> AppState {
        let config = test_config();
        let pool = PgPool::connect_lazy(&config.database_url).unwrap();
        let mailer = Mailer::from_config(&config).unwrap();
        AppState::new(pool, config, mailer)
    }

    fn token_for(state: &AppState, role: Role) -> String {
        let user = User {
            id: 1,
            email: "tester@example.com".to_string(),
            password: String::new(),
            username: "tester".to_string(),
            full_name: "Test User".to_string(),
            role: role.as_str().to_string(),
            is_verified: true,
            verification_token: None,
            verification_token_expires: None,
            pharmacy_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.jwt.issue_user(&user, 15).unwrap()
    }

    fn request(
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = router(test_state());
        let response = app
            .oneshot(request(Method::GET, "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_routes_return_json_404() {
        let app = router(test_state());
        let response = app
            .oneshot(request(Method::GET, "/api/unknown", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["message"], "Not found");
    }

    #[tokio::test]
    async fn cart_requires_a_token() {
        let app = router(test_state());
        let response = app
            .oneshot(request(Method::GET, "/api/cart", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            body_json(response).await["message"],
            "No token, authorization denied"
        );
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let app = router(test_state());
        let response = app
            .oneshot(request(
                Method::GET,
                "/api/cart",
                Some("not-a-token"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_surface_is_closed_to_customers() {
        let state = test_state();
        let token = token_for(&state, Role::Customer);
        let app = router(state);
        let response = app
            .oneshot(request(
                Method::GET,
                "/api/admin/dashboard/stats",
                Some(&token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn medication_create_is_admin_only() {
        let state = test_state();
        let token = token_for(&state, Role::Pharmacist);
        let app = router(state);
        let response = app
            .oneshot(request(
                Method::POST,
                "/api/medications",
                Some(&token),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn login_requires_both_fields() {
        let app = router(test_state());
        let response = app
            .oneshot(request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": "", "password": "" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["message"],
            "Email and password are required"
        );
    }

    #[tokio::test]
    async fn register_rejects_a_malformed_email() {
        let app = router(test_state());
        let response = app
            .oneshot(request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({
                    "email": "not-an-email",
                    "password": "Str0ng!pass",
                    "username": "newuser",
                    "full_name": "New User",
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "Invalid email format");
    }

    #[tokio::test]
    async fn guest_checkout_rejects_a_bad_phone() {
        let app = router(test_state());
        let response = app
            .oneshot(request(
                Method::POST,
                "/api/guest/initiate",
                None,
                Some(json!({ "name": "Guest Person", "phone": "000" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["message"],
            "Please provide a valid phone number"
        );
    }

    #[tokio::test]
    async fn order_without_items_is_rejected() {
        let app = router(test_state());
        let response = app
            .oneshot(request(
                Method::POST,
                "/api/orders",
                None,
                Some(json!({
                    "customerName": "Guest Person",
                    "customerPhone": "15550100000",
                    "pharmacyId": 1,
                    "items": [],
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stock_update_needs_at_least_one_field() {
        let state = test_state();
        let token = token_for(&state, Role::Pharmacist);
        let app = router(state);
        let response = app
            .oneshot(request(
                Method::PATCH,
                "/api/medications/3/stock",
                Some(&token),
                Some(json!({})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn order_status_must_be_known() {
        let state = test_state();
        let token = token_for(&state, Role::Admin);
        let app = router(state);
        let response = app
            .oneshot(request(
                Method::PATCH,
                "/api/admin/orders/9/status",
                Some(&token),
                Some(json!({ "status": "teleported" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "Invalid status");
    }

    #[tokio::test]
    async fn auth_routes_are_rate_limited() {
        let app = router(test_state());
        let body = json!({ "email": "", "password": "" });
        for _ in 0..AUTH_RATE_LIMIT {
            let response = app
                .clone()
                .oneshot(request(
                    Method::POST,
                    "/api/auth/login",
                    None,
                    Some(body.clone()),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
        let response = app
            .oneshot(request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(body),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn image_requests_cannot_escape_the_upload_dir() {
        let app = router(test_state());
        let response = app
            .oneshot(request(
                Method::GET,
                "/uploads/medications/..%2F..%2Fetc%2Fpasswd",
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
