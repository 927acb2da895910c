use envconfig::Envconfig;

/// Runtime configuration, loaded from the environment (a `.env` file is
/// honored when present). SMTP settings are optional; without them the
/// mailer logs verification links instead of sending them.
#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "DATABASE_URL")]
    pub database_url: String,

    #[envconfig(from = "JWT_SECRET")]
    pub jwt_secret: String,

    #[envconfig(from = "BIND_ADDR", default = "0.0.0.0:5000")]
    pub bind_addr: String,

    /// Base URL used when building verification links in outgoing mail.
    #[envconfig(from = "PUBLIC_BASE_URL", default = "http://localhost:5000")]
    pub public_base_url: String,

    #[envconfig(from = "UPLOAD_DIR", default = "uploads")]
    pub upload_dir: String,

    #[envconfig(from = "JWT_EXPIRY_MINUTES", default = "15")]
    pub jwt_expiry_minutes: i64,

    #[envconfig(from = "SMTP_HOST")]
    pub smtp_host: Option<String>,

    #[envconfig(from = "SMTP_USERNAME")]
    pub smtp_username: Option<String>,

    #[envconfig(from = "SMTP_PASSWORD")]
    pub smtp_password: Option<String>,

    #[envconfig(from = "SMTP_FROM", default = "no-reply@medicart.example")]
    pub smtp_from: String,
}
