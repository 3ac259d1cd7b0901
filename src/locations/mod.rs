//! Per-city flight rollups for the location heatmap.
//!
//! Flights with both a date and a city are grouped by year and, inside a
//! year, by month (0-11). Each distinct city is geocoded once; a city that
//! fails to geocode is still reported, just without `lat`/`lng`.

use crate::aggregation::Aggregator;
use crate::config::GeocodingSettings;
use crate::domain::{Coordinates, Flight, LocationStat, MonthLocations, YearlyLocationStat};
use crate::errors::ApiResult;
use async_trait::async_trait;
use chrono::Datelike;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{info, warn};

/// Flights per city at which the yearly intensity saturates
pub const YEARLY_SATURATION: f64 = 50.0;
/// Flights per city at which the monthly intensity saturates
pub const MONTHLY_SATURATION: f64 = 25.0;

/// Resolves a free-text place name to coordinates
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` when the provider has no candidate for `place`
    async fn geocode(&self, place: &str) -> ApiResult<Option<Coordinates>>;
}

#[derive(Debug, Default)]
struct CityBucket {
    count: usize,
    total_duration: f64,
    total_distance: f64,
}

impl CityBucket {
    fn add(&mut self, flight: &Flight) {
        self.count += 1;
        self.total_duration += flight.duration_secs();
        self.total_distance += flight.distance_m();
    }

    fn into_stat(self, city: String, coords: Option<&Coordinates>, saturation: f64) -> LocationStat {
        LocationStat {
            city,
            count: self.count,
            flight_count: self.count,
            total_duration: self.total_duration,
            total_distance: self.total_distance,
            lat: coords.map(|c| c.lat),
            lng: coords.map(|c| c.lng),
            intensity: (self.count as f64 / saturation).min(1.0),
        }
    }
}

type CityBuckets = BTreeMap<String, CityBucket>;

#[derive(Default)]
struct YearBuckets {
    cities: CityBuckets,
    months: BTreeMap<u32, CityBuckets>,
}

/// Distinct, trimmed city names across all flights
pub fn distinct_cities(flights: &[Flight]) -> BTreeSet<String> {
    flights
        .iter()
        .filter_map(Flight::city)
        .map(str::to_string)
        .collect()
}

/// Geocode each city once, `settings.chunk_size` at a time with a pause
/// between chunks. Failures are logged and leave the city without coordinates.
pub async fn geocode_cities(
    geocoder: &dyn Geocoder,
    cities: &BTreeSet<String>,
    settings: &GeocodingSettings,
) -> HashMap<String, Coordinates> {
    let cities: Vec<&String> = cities.iter().collect();
    let mut resolved = HashMap::new();

    for (i, chunk) in cities.chunks(settings.chunk_size.max(1)).enumerate() {
        if i > 0 && !settings.chunk_delay.is_zero() {
            tokio::time::sleep(settings.chunk_delay).await;
        }

        let results = join_all(chunk.iter().map(|city| geocoder.geocode(city))).await;
        for (city, result) in chunk.iter().zip(results) {
            match result {
                Ok(Some(coords)) => {
                    resolved.insert((*city).clone(), coords);
                }
                Ok(None) => warn!(city = %city, "no geocoding candidate"),
                Err(e) => warn!(city = %city, error = %e, "geocoding failed"),
            }
        }
    }

    info!(
        requested = cities.len(),
        resolved = resolved.len(),
        "geocoded flight cities"
    );
    resolved
}

/// Group flights by year/month/city and attach known coordinates
pub fn build_location_stats(
    aggregator: &Aggregator,
    flights: &[Flight],
    coordinates: &HashMap<String, Coordinates>,
) -> Vec<YearlyLocationStat> {
    let mut years: BTreeMap<i32, YearBuckets> = BTreeMap::new();

    for flight in flights {
        let (Some(city), Some(start)) = (flight.city(), aggregator.local_start(flight)) else {
            continue;
        };
        let year = years.entry(start.year()).or_default();
        year.cities.entry(city.to_string()).or_default().add(flight);
        year.months
            .entry(start.month0())
            .or_default()
            .entry(city.to_string())
            .or_default()
            .add(flight);
    }

    let to_stats = |buckets: CityBuckets, saturation: f64| {
        let mut stats: Vec<LocationStat> = buckets
            .into_iter()
            .map(|(city, b)| {
                let coords = coordinates.get(&city);
                b.into_stat(city, coords, saturation)
            })
            .collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.city.cmp(&b.city)));
        stats
    };

    years
        .into_iter()
        .rev()
        .map(|(year, buckets)| YearlyLocationStat {
            year,
            locations: to_stats(buckets.cities, YEARLY_SATURATION),
            months: buckets
                .months
                .into_iter()
                .map(|(month, cities)| MonthLocations {
                    month,
                    locations: to_stats(cities, MONTHLY_SATURATION),
                })
                .collect(),
        })
        .collect()
}

pub async fn aggregate_locations(
    aggregator: &Aggregator,
    flights: &[Flight],
    geocoder: &dyn Geocoder,
    settings: &GeocodingSettings,
) -> Vec<YearlyLocationStat> {
    let cities = distinct_cities(flights);
    let coordinates = geocode_cities(geocoder, &cities, settings).await;
    build_location_stats(aggregator, flights, &coordinates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApiError;
    use crate::normalize::normalize_flights;
    use chrono::FixedOffset;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    struct StubGeocoder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Geocoder for StubGeocoder {
        async fn geocode(&self, place: &str) -> ApiResult<Option<Coordinates>> {
            self.calls.lock().push(place.to_string());
            match place {
                "Zurich" => Ok(Some(Coordinates { lat: 47.37, lng: 8.54 })),
                "Austin" => Ok(Some(Coordinates { lat: 30.27, lng: -97.74 })),
                "Nowhere" => Ok(None),
                _ => Err(ApiError::UpstreamUnreachable("down".to_string())),
            }
        }
    }

    fn settings() -> GeocodingSettings {
        GeocodingSettings {
            chunk_size: 2,
            chunk_delay: Duration::ZERO,
            max_retries: 0,
        }
    }

    fn sample() -> Vec<Flight> {
        let mut raw = vec![
            json!({"id": 1, "date": "2024-01-10", "duration": 600, "distance": 100, "location": {"city": "Zurich"}}),
            json!({"id": 2, "date": "2024-01-11", "duration": 300, "distance": 50, "location": {"city": "Zurich"}}),
            json!({"id": 3, "date": "2024-03-01", "location": {"city": "Austin"}}),
            json!({"id": 4, "date": "2023-05-05", "location": {"city": "Atlantis"}}),
            json!({"id": 5, "location": {"city": "Nowhere"}}),
            json!({"id": 6, "date": "2024-03-02"}),
        ];
        for i in 0..30 {
            raw.push(json!({"id": 100 + i, "date": "2024-02-01", "location": {"city": "Austin"}}));
        }
        normalize_flights(raw)
    }

    fn utc() -> Aggregator {
        Aggregator::new(FixedOffset::east_opt(0).unwrap())
    }

    #[tokio::test]
    async fn test_each_city_geocoded_once() {
        let geocoder = StubGeocoder {
            calls: Mutex::new(Vec::new()),
        };
        aggregate_locations(&utc(), &sample(), &geocoder, &settings()).await;

        let mut calls = geocoder.calls.lock().clone();
        calls.sort();
        assert_eq!(calls, vec!["Atlantis", "Austin", "Nowhere", "Zurich"]);
    }

    #[tokio::test]
    async fn test_yearly_and_monthly_rollups() {
        let geocoder = StubGeocoder {
            calls: Mutex::new(Vec::new()),
        };
        let stats = aggregate_locations(&utc(), &sample(), &geocoder, &settings()).await;

        let years: Vec<i32> = stats.iter().map(|s| s.year).collect();
        assert_eq!(years, vec![2024, 2023]);

        let y2024 = &stats[0];
        assert_eq!(y2024.locations[0].city, "Austin");
        assert_eq!(y2024.locations[0].count, 31);
        assert_eq!(y2024.locations[0].flight_count, 31);
        assert_eq!(y2024.locations[0].intensity, 31.0 / 50.0);

        let zurich = &y2024.locations[1];
        assert_eq!(zurich.total_duration, 900.0);
        assert_eq!(zurich.total_distance, 150.0);
        assert_eq!(zurich.lat, Some(47.37));

        let months: Vec<u32> = y2024.months.iter().map(|m| m.month).collect();
        assert_eq!(months, vec![0, 1, 2]);
        // 30 flights in February saturate the monthly scale
        assert_eq!(y2024.months[1].locations[0].intensity, 1.0);
    }

    #[tokio::test]
    async fn test_failed_city_kept_without_coordinates() {
        let geocoder = StubGeocoder {
            calls: Mutex::new(Vec::new()),
        };
        let stats = aggregate_locations(&utc(), &sample(), &geocoder, &settings()).await;

        let atlantis = &stats[1].locations[0];
        assert_eq!(atlantis.city, "Atlantis");
        assert!(atlantis.lat.is_none());
        let out = serde_json::to_value(atlantis).unwrap();
        assert!(out.get("lat").is_none());
        assert!(out.get("lng").is_none());
    }
}
