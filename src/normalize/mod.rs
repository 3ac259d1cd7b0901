//! Identifier normalization at the ingestion boundary.
//!
//! The fleet API returns vehicle ids as numbers on some resources and as
//! strings on others. Every id is rewritten to its string form before the
//! payload is typed, so grouping and filtering compare strings only.

use crate::domain::{Flight, Vehicle};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

/// Canonical string form of a raw id, `None` for null or structured values
pub fn canonical_id(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 && f.abs() < 1e15 {
                        (f as i64).to_string()
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Rewrite `obj.id` to its string form; absent or null ids stay as they are
fn stringify_id(obj: &mut Value) {
    let Some(map) = obj.as_object_mut() else {
        return;
    };
    if let Some(id) = map.get_mut("id") {
        if let Some(s) = canonical_id(id) {
            *id = Value::String(s);
        }
    }
}

/// Type one record; anything that is not a JSON object is dropped
fn typed<T: DeserializeOwned>(kind: &'static str, item: Value) -> Option<T> {
    match serde_json::from_value(item) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(kind, error = %e, "skipping malformed upstream record");
            None
        }
    }
}

/// Normalize raw vehicle records into typed vehicles
pub fn normalize_vehicles(raw: Vec<Value>) -> Vec<Vehicle> {
    raw.into_iter()
        .filter_map(|mut item| {
            stringify_id(&mut item);
            typed("vehicle", item)
        })
        .collect()
}

/// Normalize raw flight records, including each embedded vehicle reference
pub fn normalize_flights(raw: Vec<Value>) -> Vec<Flight> {
    raw.into_iter()
        .filter_map(|mut item| {
            if let Some(vehicle) = item.get_mut("vehicle") {
                stringify_id(vehicle);
            }
            typed("flight", item)
        })
        .collect()
}

pub fn normalize(flights: Vec<Value>, vehicles: Vec<Value>) -> (Vec<Flight>, Vec<Vehicle>) {
    (normalize_flights(flights), normalize_vehicles(vehicles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::VehicleId;
    use serde_json::json;

    fn sample() -> (Vec<Value>, Vec<Value>) {
        let flights = vec![
            json!({"id": 1, "date": "2024-01-15", "vehicle": {"id": 42, "name": "Alpha"}}),
            json!({"id": 2, "date": "2024-02-01", "vehicle": {"id": "42"}}),
            json!({"id": 3, "date": "2024-02-03"}),
            json!({"id": 4, "vehicle": {"name": "no id"}}),
        ];
        let vehicles = vec![json!({"id": 42, "name": "Alpha"}), json!({"id": "7"})];
        (flights, vehicles)
    }

    #[test]
    fn test_canonical_id_variants() {
        assert_eq!(canonical_id(&json!(42)), Some("42".to_string()));
        assert_eq!(canonical_id(&json!(42.0)), Some("42".to_string()));
        assert_eq!(canonical_id(&json!("abc")), Some("abc".to_string()));
        assert_eq!(canonical_id(&json!(null)), None);
        assert_eq!(canonical_id(&json!({"nested": 1})), None);
    }

    #[test]
    fn test_numeric_and_string_ids_match() {
        let (flights, vehicles) = sample();
        let (flights, vehicles) = normalize(flights, vehicles);
        let expected = VehicleId::from("42");
        assert_eq!(vehicles[0].id.as_ref(), Some(&expected));
        assert_eq!(flights[0].vehicle_id(), Some(&expected));
        assert_eq!(flights[1].vehicle_id(), Some(&expected));
    }

    #[test]
    fn test_absent_ids_stay_absent() {
        let (flights, vehicles) = sample();
        let (flights, _) = normalize(flights, vehicles);
        assert!(flights[2].vehicle.is_none());
        assert!(flights[3].vehicle.is_some());
        assert!(flights[3].vehicle_id().is_none());
        assert_eq!(flights[0].vehicle.as_ref().unwrap()["id"], json!("42"));

        let out = serde_json::to_value(&flights[3]).unwrap();
        assert_eq!(out["vehicle"], json!({"name": "no id"}));
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let (flights, vehicles) = sample();
        let (once_f, once_v) = normalize(flights, vehicles);

        let again_f: Vec<Value> = once_f
            .iter()
            .map(|f| serde_json::to_value(f).unwrap())
            .collect();
        let again_v: Vec<Value> = once_v
            .iter()
            .map(|v| serde_json::to_value(v).unwrap())
            .collect();
        let (twice_f, twice_v) = normalize(again_f, again_v);

        assert_eq!(once_f, twice_f);
        assert_eq!(once_v, twice_v);
    }

    #[test]
    fn test_structured_vehicle_id_is_unassigned() {
        let flights = normalize_flights(vec![json!({"id": 1, "vehicle": {"id": [1, 2]}})]);
        assert_eq!(flights.len(), 1);
        assert!(flights[0].vehicle_id().is_none());
        assert_eq!(flights[0].vehicle.as_ref().unwrap()["id"], json!([1, 2]));
    }

    #[test]
    fn test_non_object_records_are_skipped() {
        let flights = normalize_flights(vec![json!({"id": 1}), json!("garbage"), json!(null)]);
        assert_eq!(flights.len(), 1);
        let vehicles = normalize_vehicles(vec![json!(42), json!({"id": 7})]);
        assert_eq!(vehicles.len(), 1);
        assert_eq!(vehicles[0].id, Some(VehicleId::from("7")));
    }
}
