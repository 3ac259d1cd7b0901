/// Application routes configuration
use crate::handlers::{
    clear_cache, flights_by_vehicle, health, list_flights, list_vehicles, location_stats,
    monthly_stats, not_found, rom_comparison, vehicle_flights, yearly_stats, AppState,
};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Build the application router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Fleet records
        .route("/api/flights", get(list_flights))
        .route("/api/vehicles", get(list_vehicles))
        .route("/api/vehicles/:vehicle_id/flights", get(vehicle_flights))
        .route("/api/flights-by-vehicle", get(flights_by_vehicle))
        // Aggregates
        .route("/api/yearly-stats", get(yearly_stats))
        .route("/api/yearly-stats/:year/monthly", get(monthly_stats))
        .route("/api/location-stats", get(location_stats))
        .route("/api/rom-comparison", get(rom_comparison))
        // Cache control
        .route("/api/cache/clear", post(clear_cache))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
