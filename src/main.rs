//! open-tracker server entry point.
//!
//! Starts the Axum HTTP server with the pixel, signal, metrics, and
//! dashboard endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use open_tracker::api;
use open_tracker::app_state::AppState;
use open_tracker::config::TrackerConfig;
use open_tracker::domain::{GeoResolver, NoopGeoResolver, open_geo_resolver};
use open_tracker::persistence::SqliteStore;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn geo_resolver(config: &TrackerConfig) -> anyhow::Result<Arc<dyn GeoResolver>> {
    match &config.geo_db_path {
        Some(path) => open_geo_resolver(path)
            .with_context(|| format!("loading geo database {}", path.display())),
        None => {
            tracing::info!("no GEO_DB_PATH set, geo enrichment disabled");
            Ok(Arc::new(NoopGeoResolver))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Load configuration
    let config = TrackerConfig::from_env().map_err(|e| anyhow::anyhow!("configuration: {e}"))?;
    tracing::info!(
        addr = %config.listen_addr,
        signal_mode = %config.signal_mode,
        "starting open-tracker"
    );

    // Open the store and run migrations
    let store = SqliteStore::connect(
        &config.database_url,
        config.database_max_connections,
        config.busy_timeout(),
    )
    .await
    .with_context(|| format!("opening {}", config.database_url))?;

    let geo = geo_resolver(&config)?;
    let app_state = AppState::with_system_clock(&config, store, geo);

    // Build router
    let app = Router::new().merge(api::build_router(config.request_timeout()));
    #[cfg(feature = "swagger-ui")]
    let app = {
        use utoipa::OpenApi;
        use utoipa_swagger_ui::SwaggerUi;
        app.merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::openapi::ApiDoc::openapi()),
        )
    };
    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
