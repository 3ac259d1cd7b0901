/// External API clients module
use crate::config::AppConfig;
use crate::domain::{Coordinates, Flight, VehicleId};
use crate::errors::{ApiError, ApiResult};
use crate::locations::Geocoder;
use crate::normalize::normalize_flights;
use crate::utils::num;
use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Page size used when the intent is "fetch everything"
pub const FETCH_ALL_PAGE_SIZE: u32 = 100_000;

/// Connection setup limit; a "fetch all" response may take far longer
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client wrapper with common configuration
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// `request_timeout` bounds the whole exchange; `None` leaves it unbounded
    pub fn new(request_timeout: Option<Duration>) -> ApiResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent("fleet-proxy/1.0");
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ApiError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}

/// Query parameters for the upstream flights listing, newest first.
///
/// Pagination is applied by the proxy, so the upstream is always asked for
/// one page large enough to hold the whole flight set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlightQuery {
    pub page_size: u32,
}

impl FlightQuery {
    pub fn all(page_size: u32) -> Self {
        Self { page_size }
    }

    fn params(&self) -> [(&'static str, String); 4] {
        [
            ("sort", "desc".to_string()),
            ("order_by", "date".to_string()),
            ("include_files", "false".to_string()),
            ("page_size", self.page_size.to_string()),
        ]
    }
}

/// Flights of one vehicle, found by scanning the full flight set
#[derive(Debug, Clone)]
pub struct VehicleFlightScan {
    pub flights: Vec<Flight>,
    /// Size of the flight set that was scanned
    pub scanned: usize,
}

/// The fleet-telemetry API as seen by the proxy.
///
/// Implementations return raw records; id normalization happens in the
/// service layer. Nothing here touches the cache.
#[async_trait]
pub trait FleetApi: Send + Sync {
    async fn fetch_flights(&self, query: FlightQuery) -> ApiResult<Vec<Value>>;

    async fn fetch_vehicles(&self) -> ApiResult<Vec<Value>>;

    /// Query that returns the whole flight set in one page
    fn fetch_all_query(&self) -> FlightQuery {
        FlightQuery::all(FETCH_ALL_PAGE_SIZE)
    }

    /// The upstream has no per-vehicle filter, so this fetches every flight
    /// and keeps the ones whose normalized vehicle id matches.
    async fn fetch_flights_for_vehicle(&self, vehicle_id: &VehicleId) -> ApiResult<VehicleFlightScan> {
        let raw = self.fetch_flights(self.fetch_all_query()).await?;
        let all = normalize_flights(raw);
        let scanned = all.len();
        let flights = all
            .into_iter()
            .filter(|f| f.vehicle_id() == Some(vehicle_id))
            .collect();
        Ok(VehicleFlightScan { flights, scanned })
    }
}

/// Fleet API client authenticated with the shared API token
pub struct FleetClient {
    http_client: HttpClient,
    flights_endpoint: String,
    vehicles_endpoint: String,
    api_token: String,
    fetch_all_page_size: u32,
}

impl FleetClient {
    pub fn new(
        flights_endpoint: String,
        vehicles_endpoint: String,
        api_token: String,
        fetch_all_page_size: u32,
        request_timeout: Option<Duration>,
    ) -> ApiResult<Self> {
        Ok(Self {
            http_client: HttpClient::new(request_timeout)?,
            flights_endpoint,
            vehicles_endpoint,
            api_token: api_token.trim().to_string(),
            fetch_all_page_size,
        })
    }

    /// Build a client from config, `None` when no API token is configured
    pub fn from_config(config: &AppConfig) -> ApiResult<Option<Self>> {
        config
            .api_token
            .clone()
            .map(|token| {
                Self::new(
                    config.flights_endpoint.clone(),
                    config.vehicles_endpoint.clone(),
                    token,
                    config.fetch_all_page_size,
                    config.request_timeout,
                )
            })
            .transpose()
    }

    async fn get_items(&self, url: &str, params: &[(&str, String)]) -> ApiResult<Vec<Value>> {
        debug!(url, "requesting fleet API");
        let resp = self
            .http_client
            .get_client()
            .get(url)
            .header(header::ACCEPT, "application/json")
            .header("x-api-key", &self.api_token)
            .query(params)
            .send()
            .await?;

        let resp = reject_non_success(resp).await?;
        let json: Value = resp.json().await?;
        Ok(extract_items(json))
    }
}

#[async_trait]
impl FleetApi for FleetClient {
    async fn fetch_flights(&self, query: FlightQuery) -> ApiResult<Vec<Value>> {
        let items = self
            .get_items(&self.flights_endpoint, &query.params())
            .await?;
        info!(
            count = items.len(),
            page_size = query.page_size,
            "fetched flights from fleet API"
        );
        Ok(items)
    }

    async fn fetch_vehicles(&self) -> ApiResult<Vec<Value>> {
        let items = self.get_items(&self.vehicles_endpoint, &[]).await?;
        info!(count = items.len(), "fetched vehicles from fleet API");
        Ok(items)
    }

    fn fetch_all_query(&self) -> FlightQuery {
        FlightQuery::all(self.fetch_all_page_size)
    }
}

/// Turn a non-2xx upstream response into `UpstreamRejected`
async fn reject_non_success(resp: Response) -> ApiResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: Option<Value> = resp.json().await.ok();
    Err(ApiError::UpstreamRejected {
        status: status.as_u16(),
        message: upstream_message(body.as_ref()),
    })
}

fn upstream_message(body: Option<&Value>) -> String {
    body.and_then(|b| b.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown error occurred")
        .to_string()
}

/// Accept either a bare array or `{ "items": [...] }`
pub fn extract_items(json: Value) -> Vec<Value> {
    match json {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Geocoding provider client (`GET {endpoint}?city=...` with `X-Api-Key`)
pub struct HttpGeocoder {
    http_client: HttpClient,
    endpoint: String,
    api_key: String,
    max_retries: u32,
}

impl HttpGeocoder {
    pub fn new(
        endpoint: String,
        api_key: String,
        max_retries: u32,
        request_timeout: Option<Duration>,
    ) -> ApiResult<Self> {
        Ok(Self {
            http_client: HttpClient::new(request_timeout)?,
            endpoint,
            api_key,
            max_retries,
        })
    }

    pub fn from_config(config: &AppConfig) -> ApiResult<Option<Self>> {
        config
            .geocoding_api_key
            .clone()
            .map(|key| {
                Self::new(
                    config.geocoding_endpoint.clone(),
                    key,
                    config.geocoding.max_retries,
                    config.request_timeout,
                )
            })
            .transpose()
    }

    async fn lookup_once(&self, place: &str) -> ApiResult<Option<Coordinates>> {
        let resp = self
            .http_client
            .get_client()
            .get(&self.endpoint)
            .header("X-Api-Key", &self.api_key)
            .query(&[("city", place)])
            .send()
            .await?;
        let resp = reject_non_success(resp).await?;
        let json: Value = resp.json().await?;
        Ok(first_candidate(&json))
    }
}

/// 500ms doubled per attempt, capped at one minute
fn retry_backoff(attempt: u32) -> Duration {
    let millis = 2u64
        .saturating_pow(attempt.saturating_sub(1))
        .saturating_mul(500);
    Duration::from_millis(millis.min(60_000))
}

fn is_retryable(err: &ApiError) -> bool {
    match err {
        ApiError::UpstreamUnreachable(_) => true,
        ApiError::UpstreamRejected { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
        }
        _ => false,
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, place: &str) -> ApiResult<Option<Coordinates>> {
        let mut attempt = 0;
        loop {
            match self.lookup_once(place).await {
                Err(e) if attempt < self.max_retries && is_retryable(&e) => {
                    attempt += 1;
                    let backoff = retry_backoff(attempt);
                    warn!(place, attempt, error = %e, "retrying geocode");
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }
}

/// First `{latitude, longitude}` (or `{lat, lng}`) candidate in a provider
/// response, which may be a bare array, `{ "data": [...] }` or one object.
pub fn first_candidate(json: &Value) -> Option<Coordinates> {
    let candidates: Vec<&Value> = match json {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("data").or_else(|| map.get("results")) {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => vec![json],
        },
        _ => Vec::new(),
    };

    candidates.into_iter().find_map(|c| {
        let lat = c.get("latitude").or_else(|| c.get("lat")).and_then(num)?;
        let lng = c
            .get("longitude")
            .or_else(|| c.get("lng"))
            .or_else(|| c.get("lon"))
            .and_then(num)?;
        Some(Coordinates { lat, lng })
    })
}
