/// Domain models for the application
use crate::normalize::canonical_id;
use crate::utils::num;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Vehicle identifier in canonical string form.
///
/// Upstream payloads mix numeric and string ids; both deserialize into the
/// same value, so equality is plain string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct VehicleId(String);

impl VehicleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl<'de> Deserialize<'de> for VehicleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        canonical_id(&raw)
            .map(VehicleId)
            .ok_or_else(|| serde::de::Error::custom(format!("unsupported vehicle id: {}", raw)))
    }
}

/// Flight record as returned by the fleet API.
///
/// Descriptive fields are held as raw JSON so a record with an unexpected
/// type still passes through; the accessors below read them leniently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "FlightRecord")]
pub struct Flight {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<Value>,
    /// Seconds, kept as sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<Value>,
    /// Meters, kept as sent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_url: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    #[serde(skip)]
    vehicle_id: Option<VehicleId>,
}

#[derive(Deserialize)]
struct FlightRecord {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    date: Option<Value>,
    #[serde(default)]
    duration: Option<Value>,
    #[serde(default)]
    distance: Option<Value>,
    #[serde(default)]
    vehicle: Option<Value>,
    #[serde(default)]
    location: Option<Value>,
    #[serde(default)]
    flight_url: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<FlightRecord> for Flight {
    fn from(r: FlightRecord) -> Self {
        let vehicle_id = r
            .vehicle
            .as_ref()
            .and_then(|v| v.get("id"))
            .and_then(canonical_id)
            .map(VehicleId);
        Self {
            id: r.id,
            date: r.date,
            duration: r.duration,
            distance: r.distance,
            vehicle: r.vehicle,
            location: r.location,
            flight_url: r.flight_url,
            extra: r.extra,
            vehicle_id,
        }
    }
}

impl Flight {
    /// Canonical id of the embedded vehicle reference
    pub fn vehicle_id(&self) -> Option<&VehicleId> {
        self.vehicle_id.as_ref()
    }

    /// The `date` field when it is a string
    pub fn date_str(&self) -> Option<&str> {
        self.date.as_ref().and_then(Value::as_str)
    }

    pub fn city(&self) -> Option<&str> {
        self.location
            .as_ref()
            .and_then(|l| l.get("city"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Duration in seconds, 0 when absent or not numeric
    pub fn duration_secs(&self) -> f64 {
        self.duration.as_ref().and_then(num).unwrap_or(0.0)
    }

    /// Distance in meters, 0 when absent or not numeric
    pub fn distance_m(&self) -> f64 {
        self.distance.as_ref().and_then(num).unwrap_or(0.0)
    }

    pub fn minutes(&self) -> f64 {
        self.duration_secs() / 60.0
    }
}

/// Vehicle record as returned by the fleet API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    /// `None` when absent, null or not a scalar
    #[serde(
        default,
        deserialize_with = "lenient_vehicle_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<VehicleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_cloud_services: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_vehicle_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<VehicleId>, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(canonical_id(&raw).map(VehicleId))
}

/// Full, unpaginated flight listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightListing {
    pub items: Vec<Flight>,
    pub total: usize,
    pub unique_vehicle_ids: usize,
}

/// One page of the flight listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightPage {
    pub items: Vec<Flight>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_by_vehicle: BTreeMap<VehicleId, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VehicleListing {
    pub items: Vec<Vehicle>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleFlights {
    pub items: Vec<Flight>,
    pub total: usize,
    pub vehicle_id: VehicleId,
    pub all_flights_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleGroup {
    pub vehicle: Vehicle,
    pub flights: Vec<Flight>,
    pub flight_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightsByVehicle {
    pub vehicles: Vec<VehicleGroup>,
    pub unmatched_vehicle_ids: Vec<VehicleId>,
    pub unassigned_flights: usize,
    pub total_flights: usize,
}

/// Derived per-bucket ratios, one decimal, `None` when the divisor is zero
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ratios {
    pub flights_per_vehicle: Option<String>,
    pub hours_per_vehicle: Option<String>,
    pub average_flight_duration: Option<String>,
    pub average_distance: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyStat {
    pub year: i32,
    pub total_flights: usize,
    pub total_minutes: i64,
    pub total_distance: i64,
    pub unique_vehicles: usize,
    #[serde(flatten)]
    pub ratios: Ratios,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyStat {
    /// 0 = January
    pub month: u32,
    pub total_flights: usize,
    pub total_minutes: i64,
    pub total_distance: i64,
    pub unique_vehicles: usize,
    #[serde(flatten)]
    pub ratios: Ratios,
}

/// Sunday-start week within a year
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyStat {
    pub week_start: String,
    pub total_flights: usize,
    pub total_minutes: i64,
    pub total_distance: i64,
    pub unique_vehicles: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyBreakdown {
    pub year: i32,
    pub months: Vec<MonthlyStat>,
    pub weeks: Vec<WeeklyStat>,
}

/// One ROM bucket: summed minutes and flight count for a period
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RomPoint {
    pub date: String,
    pub year: i32,
    pub total_minutes: f64,
    pub flight_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RomComparison {
    pub daily: Vec<RomPoint>,
    pub weekly: Vec<RomPoint>,
    pub monthly: Vec<RomPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationStat {
    pub city: String,
    pub count: usize,
    pub flight_count: usize,
    /// Seconds
    pub total_duration: f64,
    /// Meters
    pub total_distance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthLocations {
    pub month: u32,
    pub locations: Vec<LocationStat>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearlyLocationStat {
    pub year: i32,
    pub locations: Vec<LocationStat>,
    pub months: Vec<MonthLocations>,
}

/// Health check response
#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub now: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct CacheCleared {
    pub message: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vehicle_id_from_number_and_string() {
        let a: VehicleId = serde_json::from_value(json!(42)).unwrap();
        let b: VehicleId = serde_json::from_value(json!("42")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_flight_keeps_unknown_fields() {
        let raw = json!({
            "id": 7,
            "date": "2024-01-15T10:00:00Z",
            "duration": 60,
            "battery": {"cycles": 12},
            "flight_url": "https://example.test/f/7"
        });
        let flight: Flight = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(flight.extra.get("battery"), Some(&json!({"cycles": 12})));
        assert_eq!(serde_json::to_value(&flight).unwrap(), raw);
    }

    #[test]
    fn test_flight_missing_optional_fields() {
        let flight: Flight = serde_json::from_value(json!({"id": "x"})).unwrap();
        assert!(flight.vehicle_id().is_none());
        assert_eq!(flight.minutes(), 0.0);
        assert!(flight.city().is_none());
    }

    #[test]
    fn test_flight_duration_as_string() {
        let flight: Flight =
            serde_json::from_value(json!({"id": 1, "duration": "120"})).unwrap();
        assert_eq!(flight.duration_secs(), 120.0);
        assert_eq!(flight.distance_m(), 0.0);
    }

    #[test]
    fn test_odd_field_types_still_deserialize() {
        let raw = json!({
            "id": 1,
            "date": 1704153600,
            "location": "Zurich",
            "vehicle": {"id": 5, "name": 7},
            "flight_url": false
        });
        let flight: Flight = serde_json::from_value(raw.clone()).unwrap();
        assert!(flight.date_str().is_none());
        assert!(flight.city().is_none());
        assert_eq!(flight.vehicle_id(), Some(&VehicleId::from("5")));
        assert_eq!(serde_json::to_value(&flight).unwrap(), raw);

        let vehicle: Vehicle =
            serde_json::from_value(json!({"id": {"nested": 1}, "name": 3})).unwrap();
        assert!(vehicle.id.is_none());
        assert_eq!(vehicle.name, Some(json!(3)));
    }

    #[test]
    fn test_blank_city_is_ignored() {
        let flight: Flight =
            serde_json::from_value(json!({"id": 1, "location": {"city": "  "}})).unwrap();
        assert!(flight.city().is_none());
    }
}
