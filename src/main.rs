use anyhow::Context as _;
use axum::http::HeaderValue;
use clap::Parser;
use std::sync::Arc;
use tower_http::{cors::{Any, CorsLayer}, trace::TraceLayer};
use tracing_subscriber::EnvFilter;

use restful_model::config::{config, AppConfig};
use restful_model::database::{Database, Storage};
use restful_model::server;
use restful_model::view::{View, ViewsFile};

#[derive(Parser)]
#[command(name = "restful-model")]
#[command(about = "Serve CRUD endpoints for the tables declared in a views file")]
#[command(version)]
struct Args {
    #[arg(long, help = "YAML file declaring tables and views")]
    views: Option<String>,

    #[arg(long, help = "Database URL (sqlite or postgres)")]
    database_url: Option<String>,

    #[arg(long, help = "Port to listen on")]
    port: Option<u16>,

    #[arg(long, help = "Create declared tables that do not exist yet")]
    create_tables: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, API_VIEWS_FILE, etc.
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    // Initialize configuration (this loads the config singleton)
    let config = config();
    let default_level = if config.filter.debug_logging { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
    tracing::info!("Starting restful-model in {:?} mode", config.environment);

    let database_url = args.database_url.unwrap_or_else(|| config.database.url.clone());
    let database = Arc::new(
        Database::connect_with(&database_url, config.database.max_connections)
            .await
            .with_context(|| format!("failed to connect to {}", database_url))?,
    );
    let storage: Arc<dyn Storage> = database.clone();

    let views_path = args
        .views
        .or_else(|| config.api.views_file.clone())
        .context("no views file given (--views or API_VIEWS_FILE)")?;
    let text = std::fs::read_to_string(&views_path).with_context(|| format!("failed to read {}", views_path))?;
    let file = ViewsFile::from_yaml(&text).with_context(|| format!("failed to parse {}", views_path))?;

    let tables: Vec<_> = file.views.iter().map(|v| v.table.clone()).collect();
    if args.create_tables {
        for table in &tables {
            if !database.exists_table(&table.name).await? {
                database.create_table(table).await?;
            }
        }
    }

    let defaults = config.compile_options();
    let mut views = Vec::with_capacity(file.views.len());
    for decl in file.views {
        let name = decl.table.name.clone();
        let view_config = decl
            .into_config(storage.clone(), &tables, &defaults, &config.security.jwt_secret)
            .map_err(anyhow::Error::msg)?;
        let view = View::new(view_config, storage.clone()).with_context(|| format!("invalid view {}", name))?;
        tracing::info!("Mounted view /{}", name);
        views.push(Arc::new(view));
    }

    let mut app = server::router(views, storage);
    if config.api.enable_request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }
    if let Some(cors) = cors_layer(config) {
        app = app.layer(cors);
    }

    let port = args.port.unwrap_or(config.api.port);
    let bind_addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("restful-model listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    database.close().await;
    Ok(())
}

fn cors_layer(config: &AppConfig) -> Option<CorsLayer> {
    if !config.security.enable_cors {
        return None;
    }
    if config.security.cors_origins.is_empty() {
        return Some(CorsLayer::permissive());
    }
    let origins: Vec<HeaderValue> = config
        .security
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    Some(CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any))
}
