use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use shiftsync_server::config::{generate_config_template, Config};
use shiftsync_server::state::{AppState, Timings};
use shiftsync_server::store::SqliteStore;
use shiftsync_server::{auth, curriculum, db, routes, sync};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("shiftsync_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter())
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter())
            .init();
    }

    tracing::info!(
        "ShiftSync server v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    if config.skip_seed {
        tracing::info!("Curriculum seeding skipped");
    } else if curriculum::seed::seed_starter_curriculum(&db)? {
        tracing::info!("Seeded starter curriculum");
    }

    let curriculum = Arc::new(curriculum::load(&db)?);
    if curriculum.is_empty() {
        tracing::warn!("Curriculum is empty, every gate will be closed");
    } else {
        tracing::info!(shifts = curriculum.shifts().len(), "Curriculum loaded");
    }

    // Load or generate the JWT secret shared with the auth service
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let store = Arc::new(SqliteStore::new(db, curriculum.clone()));
    let app_state = AppState::new(
        jwt_secret,
        curriculum,
        store.clone(),
        store,
        Timings::from(&config),
    );

    // Keep connected learners' gates current with teacher unlocks
    sync::spawn_unlock_poller(app_state.clone());

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
