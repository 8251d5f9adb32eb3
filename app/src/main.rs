use axum::{
    routing::get,
    Router,
    middleware::{self},
};
use cards::service::CardService;
use clap::{Parser, Subcommand};
use common::{AppState, Config, auth::auth_middleware, cache::SuggestionCache};
use database::Database;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod handlers;

#[derive(Parser)]
#[command(author, version, about = "Personal greeting card archive API", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (the default)
    Serve,
    /// Rewrite single-string senders/recipients as lists, print the report and exit
    MigrateToArrays,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize Logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Load Config from .env, environment and CLI args
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }
    let cli = Cli::parse();
    let config = cli.config;

    // 3. Initialize Database
    let db = Database::new(&config.database_url).await?;
    db.run_migrations().await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::MigrateToArrays => {
            let report = CardService::migrate_to_arrays(&db, &SuggestionCache::default()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Serve => serve(db, config).await,
    }
}

fn app_router(state: Arc<AppState>) -> Router {
    // Protected Routes
    let protected_routes = Router::<Arc<AppState>>::new()
        .merge(cards::handler::cards_router(state.clone()))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let serve_uploads = ServeDir::new(&state.config.upload_dir);

    // Combined Application Router
    Router::<Arc<AppState>>::new()
        .route("/", get(handlers::system::root))
        .route("/health", get(handlers::system::health))
        .nest_service("/uploads", serve_uploads)
        .merge(protected_routes)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn serve(db: Database, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    tokio::fs::create_dir_all(&config.upload_dir).await?;

    let state = Arc::new(AppState::new(db, config.clone()));
    let app = app_router(state);

    // 4. Start Server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    tracing::info!("Serving uploaded pages from {}", config.upload_dir.display());
    if config.admin_users.is_empty() {
        tracing::warn!("ADMIN_USERS is not set; POST /migrate-to-arrays will reject every caller.");
    }
    axum::serve(listener, app).await?;

    Ok(())
}
