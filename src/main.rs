/// Fleet proxy entry point
use fleet_proxy::aggregation::Aggregator;
use fleet_proxy::cache::TtlCache;
use fleet_proxy::clients::{FleetApi, FleetClient, HttpGeocoder};
use fleet_proxy::config::AppConfig;
use fleet_proxy::handlers::AppState;
use fleet_proxy::locations::Geocoder;
use fleet_proxy::routes::build_router;
use fleet_proxy::services::FleetService;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    // Load configuration
    let config = AppConfig::from_env()?;
    info!("Configuration loaded successfully");

    // Initialize clients
    let fleet: Option<Arc<dyn FleetApi>> = match FleetClient::from_config(&config)? {
        Some(client) => Some(Arc::new(client)),
        None => {
            warn!("AUTERION_API_TOKEN is not set, fleet endpoints will return 500");
            None
        }
    };
    let geocoder: Option<Arc<dyn Geocoder>> = match HttpGeocoder::from_config(&config)? {
        Some(client) => Some(Arc::new(client)),
        None => {
            warn!("GEOCODING_API_KEY is not set, location stats will lack coordinates");
            None
        }
    };

    // Shared cache with periodic expiry sweep
    let cache = Arc::new(TtlCache::new(config.cache.ttl));
    cache.spawn_sweeper(config.cache.sweep_interval);
    info!(
        ttl_secs = config.cache.ttl.as_secs(),
        sweep_secs = config.cache.sweep_interval.as_secs(),
        "cache initialized"
    );

    // Initialize services
    let service = Arc::new(FleetService::new(
        fleet,
        geocoder,
        cache,
        Aggregator::new(config.stats_offset),
        config.geocoding.clone(),
    ));
    let state = AppState { service };

    // Build router
    let app = build_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("fleet proxy listening on {}", addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
