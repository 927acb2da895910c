use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::JwtKeys;
use crate::config::Config;
use crate::services::mailer::Mailer;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: JwtKeys,
    pub mailer: Mailer,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, mailer: Mailer) -> Self {
        let jwt = JwtKeys::new(&config.jwt_secret);
        Self {
            pool,
            config: Arc::new(config),
            jwt,
            mailer,
        }
    }
}
