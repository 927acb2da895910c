use std::net::SocketAddr;

use dotenvy::dotenv;
use envconfig::Envconfig;

use medicart::config::Config;
use medicart::db;
use medicart::routes;
use medicart::services;
use medicart::services::mailer::Mailer;
use medicart::state::AppState;

type Error = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    log::info!("Starting the pharmacy API...");

    // Load environment variables from a .env file if present
    dotenv().ok();

    let config = Config::init_from_env().map_err(|e| format!("configuration error: {}", e))?;

    let pool = db::init_db(&config.database_url).await?;
    db::run_migrations(&pool).await?;

    let upload_dir = std::path::Path::new(&config.upload_dir);
    tokio::fs::create_dir_all(upload_dir.join("medications")).await?;
    tokio::fs::create_dir_all(upload_dir.join("prescriptions")).await?;

    let mailer = Mailer::from_config(&config)?;

    services::schedule_maintenance(pool.clone())
        .await
        .map_err(|e| format!("failed to start maintenance scheduler: {}", e))?;

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(pool, config, mailer);
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    log::info!("Listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    log::info!("Shutting down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to install ctrl-c handler: {}", e);
    }
}
