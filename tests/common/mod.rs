use async_trait::async_trait;
use axum::Router;
use chrono::FixedOffset;
use fleet_proxy::aggregation::Aggregator;
use fleet_proxy::cache::TtlCache;
use fleet_proxy::clients::{FleetApi, FlightQuery};
use fleet_proxy::config::GeocodingSettings;
use fleet_proxy::domain::Coordinates;
use fleet_proxy::errors::{ApiError, ApiResult};
use fleet_proxy::handlers::AppState;
use fleet_proxy::locations::Geocoder;
use fleet_proxy::routes::build_router;
use fleet_proxy::services::FleetService;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[allow(dead_code)]
#[derive(Clone, Copy)]
pub enum Failure {
    Rejected(u16, &'static str),
    Unreachable,
}

/// In-memory fleet API that counts upstream calls
#[derive(Default)]
pub struct MockFleet {
    pub flights: Mutex<Vec<Value>>,
    pub vehicles: Vec<Value>,
    pub failure: Option<Failure>,
    pub flight_calls: AtomicUsize,
    pub vehicle_calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockFleet {
    pub fn new(flights: Vec<Value>, vehicles: Vec<Value>) -> Self {
        Self {
            flights: Mutex::new(flights),
            vehicles,
            ..Default::default()
        }
    }

    pub fn failing(failure: Failure) -> Self {
        Self {
            failure: Some(failure),
            ..Default::default()
        }
    }

    /// Replace what the next upstream flights call returns
    pub fn set_flights(&self, flights: Vec<Value>) {
        *self.flights.lock() = flights;
    }

    pub fn flight_calls(&self) -> usize {
        self.flight_calls.load(Ordering::SeqCst)
    }

    pub fn vehicle_calls(&self) -> usize {
        self.vehicle_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> ApiResult<()> {
        match self.failure {
            None => Ok(()),
            Some(Failure::Rejected(status, message)) => Err(ApiError::UpstreamRejected {
                status,
                message: message.to_string(),
            }),
            Some(Failure::Unreachable) => {
                Err(ApiError::UpstreamUnreachable("connection refused".to_string()))
            }
        }
    }
}

#[async_trait]
impl FleetApi for MockFleet {
    async fn fetch_flights(&self, _query: FlightQuery) -> ApiResult<Vec<Value>> {
        self.flight_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.flights.lock().clone())
    }

    async fn fetch_vehicles(&self) -> ApiResult<Vec<Value>> {
        self.vehicle_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.vehicles.clone())
    }
}

/// Geocoder backed by a fixed table
#[allow(dead_code)]
pub struct StubGeocoder(pub HashMap<&'static str, Coordinates>);

#[async_trait]
impl Geocoder for StubGeocoder {
    async fn geocode(&self, place: &str) -> ApiResult<Option<Coordinates>> {
        Ok(self.0.get(place).copied())
    }
}

#[allow(dead_code)]
pub fn app(fleet: Option<Arc<MockFleet>>) -> Router {
    app_with_geocoder(fleet, None)
}

pub fn app_with_geocoder(
    fleet: Option<Arc<MockFleet>>,
    geocoder: Option<Arc<dyn Geocoder>>,
) -> Router {
    let fleet = fleet.map(|f| f as Arc<dyn FleetApi>);
    let cache = Arc::new(TtlCache::new(Duration::from_secs(300)));
    let geocoding = GeocodingSettings {
        chunk_size: 10,
        chunk_delay: Duration::ZERO,
        max_retries: 0,
    };
    let service = FleetService::new(
        fleet,
        geocoder,
        cache,
        Aggregator::new(FixedOffset::east_opt(0).expect("utc offset")),
        geocoding,
    );
    build_router(AppState {
        service: Arc::new(service),
    })
}

pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}
