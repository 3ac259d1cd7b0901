/// Business logic services layer
use crate::aggregation::{count_by_vehicle, group_by_vehicle, unique_vehicle_count, Aggregator};
use crate::cache::TtlCache;
use crate::clients::FleetApi;
use crate::config::GeocodingSettings;
use crate::domain::{
    Coordinates, FlightListing, FlightPage, FlightsByVehicle, MonthlyBreakdown, RomComparison,
    VehicleFlights, VehicleGroup, VehicleId, VehicleListing, YearlyLocationStat, YearlyStat,
};
use crate::errors::{ApiError, ApiResult};
use crate::locations::{aggregate_locations, Geocoder};
use crate::normalize::{normalize_flights, normalize_vehicles};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

pub const ALL_FLIGHTS_KEY: &str = "all_flights";
pub const ALL_VEHICLES_KEY: &str = "all_vehicles";
pub const TOTAL_BY_VEHICLE_KEY: &str = "flights_total_by_vehicle";

pub fn flights_page_key(page: usize, page_size: usize) -> String {
    format!("flights_{}_{}", page, page_size)
}

fn geocode_key(city: &str) -> String {
    format!("geocode_{}", city.to_lowercase())
}

/// Response bodies and lookups held in the shared cache
#[derive(Debug, Clone)]
pub enum CachedPayload {
    Flights(Arc<FlightListing>),
    Vehicles(Arc<VehicleListing>),
    FlightPage(Arc<FlightPage>),
    TotalByVehicle(Arc<BTreeMap<VehicleId, usize>>),
    Coordinates(Coordinates),
}

fn wrong_payload(key: &str) -> ApiError {
    ApiError::Internal(format!("cache entry {} holds an unexpected payload", key))
}

/// A response body plus where it came from
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    /// `true` when served from the cache
    pub cached: bool,
    pub cached_at: DateTime<Utc>,
}

/// Fleet data proxy: read-through cache, normalization and aggregation
pub struct FleetService {
    fleet: Option<Arc<dyn FleetApi>>,
    geocoder: Option<Arc<dyn Geocoder>>,
    cache: Arc<TtlCache<CachedPayload>>,
    aggregator: Aggregator,
    geocoding: GeocodingSettings,
}

impl FleetService {
    pub fn new(
        fleet: Option<Arc<dyn FleetApi>>,
        geocoder: Option<Arc<dyn Geocoder>>,
        cache: Arc<TtlCache<CachedPayload>>,
        aggregator: Aggregator,
        geocoding: GeocodingSettings,
    ) -> Self {
        Self {
            fleet,
            geocoder,
            cache,
            aggregator,
            geocoding,
        }
    }

    /// The upstream client, or a configuration error when no token is set
    fn fleet(&self) -> ApiResult<&dyn FleetApi> {
        self.fleet.as_deref().ok_or_else(ApiError::missing_token)
    }

    async fn flight_listing(&self) -> ApiResult<Fetched<Arc<FlightListing>>> {
        let fleet = self.fleet()?;
        let lookup = self
            .cache
            .get_or_try_fetch(ALL_FLIGHTS_KEY, || async {
                info!("cache miss, fetching all flights");
                let raw = fleet.fetch_flights(fleet.fetch_all_query()).await?;
                let items = normalize_flights(raw);
                let unique_vehicle_ids = unique_vehicle_count(&items);
                info!(
                    total = items.len(),
                    unique_vehicle_ids, "normalized flights"
                );
                Ok::<_, ApiError>(CachedPayload::Flights(Arc::new(FlightListing {
                    total: items.len(),
                    unique_vehicle_ids,
                    items,
                })))
            })
            .await?;

        match lookup.value {
            CachedPayload::Flights(listing) => Ok(Fetched {
                value: listing,
                cached: lookup.hit,
                cached_at: lookup.cached_at,
            }),
            _ => Err(wrong_payload(ALL_FLIGHTS_KEY)),
        }
    }

    /// Every flight, unpaginated
    pub async fn list_flights(&self) -> ApiResult<Fetched<Arc<FlightListing>>> {
        let fetched = self.flight_listing().await?;
        if fetched.cached {
            info!("returning cached flights");
        }
        Ok(fetched)
    }

    /// One page of the flight listing, in upstream (newest first) order
    pub async fn flights_page(
        &self,
        page: usize,
        page_size: usize,
    ) -> ApiResult<Fetched<Arc<FlightPage>>> {
        if page == 0 || page_size == 0 {
            return Err(ApiError::InvalidInput(
                "page and pageSize must be at least 1".to_string(),
            ));
        }
        self.fleet()?;

        let key = flights_page_key(page, page_size);
        let lookup = self
            .cache
            .get_or_try_fetch(&key, || async {
                let listing = self.flight_listing().await?.value;
                let total = listing.items.len();
                let items = listing
                    .items
                    .iter()
                    .skip((page - 1).saturating_mul(page_size))
                    .take(page_size)
                    .cloned()
                    .collect();
                let total_by_vehicle = self.total_by_vehicle(page, &listing)?;

                Ok::<_, ApiError>(CachedPayload::FlightPage(Arc::new(FlightPage {
                    items,
                    total,
                    page,
                    page_size,
                    total_pages: total.div_ceil(page_size),
                    total_by_vehicle: (*total_by_vehicle).clone(),
                })))
            })
            .await?;

        match lookup.value {
            CachedPayload::FlightPage(body) => Ok(Fetched {
                value: body,
                cached: lookup.hit,
                cached_at: lookup.cached_at,
            }),
            _ => Err(wrong_payload(&key)),
        }
    }

    /// Per-vehicle flight counts, snapshotted on page 1 and reused by later
    /// pages until the cache entry expires
    fn total_by_vehicle(
        &self,
        page: usize,
        listing: &FlightListing,
    ) -> ApiResult<Arc<BTreeMap<VehicleId, usize>>> {
        if page != 1 {
            if let Some(hit) = self.cache.get(TOTAL_BY_VEHICLE_KEY) {
                return match hit.value {
                    CachedPayload::TotalByVehicle(totals) => Ok(totals),
                    _ => Err(wrong_payload(TOTAL_BY_VEHICLE_KEY)),
                };
            }
        }
        let totals = Arc::new(count_by_vehicle(&listing.items));
        self.cache.set(
            TOTAL_BY_VEHICLE_KEY,
            CachedPayload::TotalByVehicle(Arc::clone(&totals)),
        );
        Ok(totals)
    }

    pub async fn list_vehicles(&self) -> ApiResult<Fetched<Arc<VehicleListing>>> {
        let fleet = self.fleet()?;
        let lookup = self
            .cache
            .get_or_try_fetch(ALL_VEHICLES_KEY, || async {
                info!("cache miss, fetching all vehicles");
                let items = normalize_vehicles(fleet.fetch_vehicles().await?);
                Ok::<_, ApiError>(CachedPayload::Vehicles(Arc::new(VehicleListing {
                    total: items.len(),
                    items,
                })))
            })
            .await?;

        match lookup.value {
            CachedPayload::Vehicles(listing) => Ok(Fetched {
                value: listing,
                cached: lookup.hit,
                cached_at: lookup.cached_at,
            }),
            _ => Err(wrong_payload(ALL_VEHICLES_KEY)),
        }
    }

    /// Flights of one vehicle, filtered from the full flight set
    pub async fn vehicle_flights(&self, vehicle_id: VehicleId) -> ApiResult<VehicleFlights> {
        let fleet = self.fleet()?;

        let (items, all_flights_count) = match self.cache.get(ALL_FLIGHTS_KEY) {
            Some(hit) => match hit.value {
                CachedPayload::Flights(listing) => {
                    let items: Vec<_> = listing
                        .items
                        .iter()
                        .filter(|f| f.vehicle_id() == Some(&vehicle_id))
                        .cloned()
                        .collect();
                    (items, listing.items.len())
                }
                _ => return Err(wrong_payload(ALL_FLIGHTS_KEY)),
            },
            None => {
                let scan = fleet.fetch_flights_for_vehicle(&vehicle_id).await?;
                (scan.flights, scan.scanned)
            }
        };

        info!(vehicle_id = %vehicle_id, found = items.len(), "filtered flights for vehicle");
        if items.is_empty() {
            self.log_known_vehicle_ids(&vehicle_id);
        }

        Ok(VehicleFlights {
            total: items.len(),
            items,
            vehicle_id,
            all_flights_count,
        })
    }

    fn log_known_vehicle_ids(&self, wanted: &VehicleId) {
        let Some(hit) = self.cache.get(ALL_FLIGHTS_KEY) else {
            return;
        };
        if let CachedPayload::Flights(listing) = hit.value {
            let seen: BTreeSet<&str> = listing
                .items
                .iter()
                .filter_map(|f| f.vehicle_id().map(VehicleId::as_str))
                .collect();
            let sample: Vec<&str> = seen.iter().take(10).copied().collect();
            warn!(
                vehicle_id = %wanted,
                seen = seen.len(),
                sample = ?sample,
                "no flights for vehicle"
            );
        }
    }

    /// Every known vehicle with its flights, in upstream vehicle order
    pub async fn flights_by_vehicle(&self) -> ApiResult<FlightsByVehicle> {
        let flights = self.flight_listing().await?.value;
        let vehicles = self.list_vehicles().await?.value;

        let mut grouping = group_by_vehicle(&flights.items, &vehicles.items);
        if !grouping.unmatched_vehicle_ids.is_empty() {
            let examples: Vec<&str> = grouping
                .unmatched_vehicle_ids
                .iter()
                .take(5)
                .map(VehicleId::as_str)
                .collect();
            warn!(
                count = grouping.unmatched_vehicle_ids.len(),
                examples = ?examples,
                "flights reference unknown vehicles"
            );
        }

        let groups = vehicles
            .items
            .iter()
            .filter_map(|vehicle| {
                let id = vehicle.id.as_ref()?;
                let flights = grouping.flights_by_vehicle.remove(id)?;
                Some(VehicleGroup {
                    vehicle: vehicle.clone(),
                    flight_count: flights.len(),
                    flights,
                })
            })
            .collect();

        Ok(FlightsByVehicle {
            vehicles: groups,
            unmatched_vehicle_ids: grouping.unmatched_vehicle_ids.into_iter().collect(),
            unassigned_flights: grouping.unassigned_flights,
            total_flights: flights.items.len(),
        })
    }

    pub async fn yearly_stats(&self) -> ApiResult<Vec<YearlyStat>> {
        let flights = self.flight_listing().await?.value;
        Ok(self.aggregator.by_year(&flights.items))
    }

    pub async fn monthly_stats(&self, year: i32) -> ApiResult<MonthlyBreakdown> {
        let flights = self.flight_listing().await?.value;
        Ok(self.aggregator.monthly_breakdown(&flights.items, year))
    }

    pub async fn rom_comparison(&self) -> ApiResult<RomComparison> {
        let flights = self.flight_listing().await?.value;
        Ok(self.aggregator.rom_comparison(&flights.items))
    }

    pub async fn location_stats(&self) -> ApiResult<Vec<YearlyLocationStat>> {
        let flights = self.flight_listing().await?.value;
        if self.geocoder.is_none() {
            warn!("no geocoding credential configured, locations will lack coordinates");
        }
        let geocoder = CachingGeocoder {
            inner: self.geocoder.as_deref(),
            cache: &self.cache,
        };
        Ok(aggregate_locations(&self.aggregator, &flights.items, &geocoder, &self.geocoding).await)
    }

    pub fn clear_cache(&self) {
        self.cache.flush_all();
        info!("cache cleared");
    }
}

/// Geocoder that remembers successful lookups in the shared cache
struct CachingGeocoder<'a> {
    inner: Option<&'a dyn Geocoder>,
    cache: &'a TtlCache<CachedPayload>,
}

#[async_trait]
impl<'a> Geocoder for CachingGeocoder<'a> {
    async fn geocode(&self, place: &str) -> ApiResult<Option<Coordinates>> {
        let key = geocode_key(place);
        if let Some(hit) = self.cache.get(&key) {
            if let CachedPayload::Coordinates(coords) = hit.value {
                return Ok(Some(coords));
            }
        }
        let Some(inner) = self.inner else {
            return Ok(None);
        };
        let found = inner.geocode(place).await?;
        if let Some(coords) = found {
            self.cache.set(key, CachedPayload::Coordinates(coords));
        }
        Ok(found)
    }
}
