/// HTTP request handlers
use crate::domain::{
    CacheCleared, FlightsByVehicle, Health, MonthlyBreakdown, RomComparison, VehicleFlights,
    VehicleId, YearlyLocationStat, YearlyStat,
};
use crate::errors::{ApiError, ApiResult};
use crate::services::{Fetched, FleetService};
use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::Uri,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FleetService>,
}

/// Response body annotated with cache provenance
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse<T: Serialize> {
    #[serde(flatten)]
    pub data: T,
    pub cached: bool,
    pub cache_time: DateTime<Utc>,
}

impl<T: Serialize> From<Fetched<T>> for CachedResponse<T> {
    fn from(fetched: Fetched<T>) -> Self {
        Self {
            data: fetched.value,
            cached: fetched.cached,
            cache_time: fetched.cached_at,
        }
    }
}

/// Raw pagination parameters, parsed by hand so bad input gets a JSON error
#[derive(Debug, Default, Deserialize)]
pub struct FlightsParams {
    pub page: Option<String>,
    #[serde(rename = "pageSize")]
    pub page_size: Option<String>,
}

impl FlightsParams {
    /// `None` when no pagination was requested
    pub fn pagination(&self) -> ApiResult<Option<(usize, usize)>> {
        if self.page.is_none() && self.page_size.is_none() {
            return Ok(None);
        }
        let page = parse_positive(self.page.as_deref(), "page", DEFAULT_PAGE)?;
        let page_size = parse_positive(self.page_size.as_deref(), "pageSize", DEFAULT_PAGE_SIZE)?;
        Ok(Some((page, page_size)))
    }
}

fn parse_positive(raw: Option<&str>, name: &str, default: usize) -> ApiResult<usize> {
    match raw.map(str::trim) {
        None | Some("") => Ok(default),
        Some(s) => s
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| ApiError::InvalidInput(format!("{} must be a positive integer", name))),
    }
}

/// Health check handler
pub async fn health() -> Json<Health> {
    Json(Health {
        status: "ok",
        now: Utc::now(),
    })
}

/// List flights, paginated when `page` or `pageSize` is given
pub async fn list_flights(
    params: Result<Query<FlightsParams>, QueryRejection>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let Query(params) = params.map_err(|e| ApiError::InvalidInput(e.body_text()))?;
    match params.pagination()? {
        Some((page, page_size)) => {
            let fetched = state.service.flights_page(page, page_size).await?;
            Ok(Json(CachedResponse::from(fetched)).into_response())
        }
        None => {
            let fetched = state.service.list_flights().await?;
            Ok(Json(CachedResponse::from(fetched)).into_response())
        }
    }
}

/// List vehicles
pub async fn list_vehicles(State(state): State<AppState>) -> Result<Response, ApiError> {
    let fetched = state.service.list_vehicles().await?;
    Ok(Json(CachedResponse::from(fetched)).into_response())
}

/// Flights for one vehicle
pub async fn vehicle_flights(
    Path(vehicle_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<VehicleFlights>, ApiError> {
    let flights = state
        .service
        .vehicle_flights(VehicleId::new(vehicle_id.trim()))
        .await?;
    Ok(Json(flights))
}

/// Every vehicle with its flights
pub async fn flights_by_vehicle(
    State(state): State<AppState>,
) -> Result<Json<FlightsByVehicle>, ApiError> {
    Ok(Json(state.service.flights_by_vehicle().await?))
}

pub async fn yearly_stats(State(state): State<AppState>) -> Result<Json<Vec<YearlyStat>>, ApiError> {
    Ok(Json(state.service.yearly_stats().await?))
}

pub async fn monthly_stats(
    Path(year): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<MonthlyBreakdown>, ApiError> {
    let year = year
        .trim()
        .parse::<i32>()
        .map_err(|_| ApiError::InvalidInput(format!("invalid year: {}", year)))?;
    Ok(Json(state.service.monthly_stats(year).await?))
}

pub async fn location_stats(
    State(state): State<AppState>,
) -> Result<Json<Vec<YearlyLocationStat>>, ApiError> {
    Ok(Json(state.service.location_stats().await?))
}

pub async fn rom_comparison(
    State(state): State<AppState>,
) -> Result<Json<RomComparison>, ApiError> {
    Ok(Json(state.service.rom_comparison().await?))
}

/// JSON 404 for paths no route matches
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("no route for {}", uri.path()))
}

/// Flush every cache entry
pub async fn clear_cache(State(state): State<AppState>) -> Json<CacheCleared> {
    state.service.clear_cache();
    Json(CacheCleared {
        message: "Cache cleared successfully",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(page: Option<&str>, page_size: Option<&str>) -> FlightsParams {
        FlightsParams {
            page: page.map(str::to_string),
            page_size: page_size.map(str::to_string),
        }
    }

    #[test]
    fn test_no_params_means_unpaginated() {
        assert_eq!(params(None, None).pagination().unwrap(), None);
    }

    #[test]
    fn test_defaults_fill_missing_param() {
        assert_eq!(params(Some("3"), None).pagination().unwrap(), Some((3, 100)));
        assert_eq!(params(None, Some("25")).pagination().unwrap(), Some((1, 25)));
    }

    #[test]
    fn test_rejects_zero_and_garbage() {
        assert!(params(Some("0"), None).pagination().is_err());
        assert!(params(Some("abc"), Some("10")).pagination().is_err());
        assert!(params(Some("1"), Some("-5")).pagination().is_err());
    }
}
