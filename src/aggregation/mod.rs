//! Time-bucketed rollups and per-vehicle grouping over a flight set.
//!
//! Buckets live only for one call. Every calendar partition is taken in the
//! aggregator's configured offset, and flights without a parseable `date`
//! are left out of every time bucket.
//!
//! Two week conventions exist on purpose: the yearly/monthly breakdown uses
//! Sunday-start weeks, the ROM comparison uses Monday-start weeks.

use crate::domain::{
    Flight, MonthlyBreakdown, MonthlyStat, Ratios, RomComparison, RomPoint, Vehicle, VehicleId,
    WeeklyStat, YearlyStat,
};
use crate::utils::{monday_week_start, parse_flight_date, ratio, sunday_week_start};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

#[derive(Debug, Default)]
struct Bucket {
    flight_count: usize,
    total_minutes: f64,
    total_distance: f64,
    vehicles: HashSet<VehicleId>,
}

impl Bucket {
    fn add(&mut self, flight: &Flight) {
        self.flight_count += 1;
        self.total_minutes += flight.minutes();
        self.total_distance += flight.distance_m();
        if let Some(id) = flight.vehicle_id() {
            self.vehicles.insert(id.clone());
        }
    }

    fn ratios(&self) -> Ratios {
        let flights = self.flight_count as f64;
        let vehicles = self.vehicles.len() as f64;
        Ratios {
            flights_per_vehicle: ratio(flights, vehicles),
            hours_per_vehicle: ratio(self.total_minutes / 60.0, vehicles),
            average_flight_duration: ratio(self.total_minutes, flights),
            average_distance: ratio(self.total_distance, flights),
        }
    }
}

/// Calendar rollups in a fixed local offset
#[derive(Debug, Clone)]
pub struct Aggregator {
    offset: FixedOffset,
}

impl Aggregator {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Local start time, `None` for undated or unparseable flights
    pub fn local_start(&self, flight: &Flight) -> Option<DateTime<FixedOffset>> {
        flight
            .date_str()
            .and_then(|raw| parse_flight_date(raw, &self.offset))
    }

    fn dated<'a>(
        &'a self,
        flights: &'a [Flight],
    ) -> impl Iterator<Item = (NaiveDate, &'a Flight)> + 'a {
        flights
            .iter()
            .filter_map(move |f| self.local_start(f).map(|dt| (dt.date_naive(), f)))
    }

    /// Yearly rollups, newest year first
    pub fn by_year(&self, flights: &[Flight]) -> Vec<YearlyStat> {
        let mut buckets: BTreeMap<i32, Bucket> = BTreeMap::new();
        for (date, flight) in self.dated(flights) {
            buckets.entry(date.year()).or_default().add(flight);
        }

        buckets
            .into_iter()
            .rev()
            .map(|(year, b)| YearlyStat {
                year,
                total_flights: b.flight_count,
                total_minutes: b.total_minutes.round() as i64,
                total_distance: b.total_distance.round() as i64,
                unique_vehicles: b.vehicles.len(),
                ratios: b.ratios(),
            })
            .collect()
    }

    /// Monthly rollups for one year, January (0) first
    pub fn by_month(&self, flights: &[Flight], year: i32) -> Vec<MonthlyStat> {
        let mut buckets: BTreeMap<u32, Bucket> = BTreeMap::new();
        for (date, flight) in self.dated(flights).filter(|(d, _)| d.year() == year) {
            buckets.entry(date.month0()).or_default().add(flight);
        }

        buckets
            .into_iter()
            .map(|(month, b)| MonthlyStat {
                month,
                total_flights: b.flight_count,
                total_minutes: b.total_minutes.round() as i64,
                total_distance: b.total_distance.round() as i64,
                unique_vehicles: b.vehicles.len(),
                ratios: b.ratios(),
            })
            .collect()
    }

    /// Sunday-start weekly rollups for flights dated in `year`
    pub fn sunday_weeks(&self, flights: &[Flight], year: i32) -> Vec<WeeklyStat> {
        let mut buckets: BTreeMap<NaiveDate, Bucket> = BTreeMap::new();
        for (date, flight) in self.dated(flights).filter(|(d, _)| d.year() == year) {
            buckets
                .entry(sunday_week_start(date))
                .or_default()
                .add(flight);
        }

        buckets
            .into_iter()
            .map(|(start, b)| WeeklyStat {
                week_start: start.format("%Y-%m-%d").to_string(),
                total_flights: b.flight_count,
                total_minutes: b.total_minutes.round() as i64,
                total_distance: b.total_distance.round() as i64,
                unique_vehicles: b.vehicles.len(),
            })
            .collect()
    }

    pub fn monthly_breakdown(&self, flights: &[Flight], year: i32) -> MonthlyBreakdown {
        MonthlyBreakdown {
            year,
            months: self.by_month(flights, year),
            weeks: self.sunday_weeks(flights, year),
        }
    }

    /// Daily, Monday-start weekly and monthly minute/count series
    pub fn rom_comparison(&self, flights: &[Flight]) -> RomComparison {
        let mut daily: BTreeMap<NaiveDate, Bucket> = BTreeMap::new();
        let mut weekly: BTreeMap<NaiveDate, Bucket> = BTreeMap::new();
        let mut monthly: BTreeMap<(i32, u32), Bucket> = BTreeMap::new();

        for (date, flight) in self.dated(flights) {
            daily.entry(date).or_default().add(flight);
            weekly
                .entry(monday_week_start(date))
                .or_default()
                .add(flight);
            monthly
                .entry((date.year(), date.month()))
                .or_default()
                .add(flight);
        }

        let point = |date: String, year: i32, b: Bucket| RomPoint {
            date,
            year,
            total_minutes: b.total_minutes,
            flight_count: b.flight_count,
        };

        RomComparison {
            daily: daily
                .into_iter()
                .map(|(d, b)| point(d.format("%Y-%m-%d").to_string(), d.year(), b))
                .collect(),
            weekly: weekly
                .into_iter()
                .map(|(d, b)| point(d.format("%Y-%m-%d").to_string(), d.year(), b))
                .collect(),
            monthly: monthly
                .into_iter()
                .map(|((y, m), b)| point(format!("{:04}-{:02}", y, m), y, b))
                .collect(),
        }
    }
}

/// Flights grouped under the vehicles that flew them
#[derive(Debug, Default)]
pub struct VehicleGrouping {
    /// Every known vehicle id, including ones with no flights
    pub flights_by_vehicle: HashMap<VehicleId, Vec<Flight>>,
    /// Ids seen on flights that match no known vehicle
    pub unmatched_vehicle_ids: BTreeSet<VehicleId>,
    /// Flights attached to no vehicle list
    pub unassigned_flights: usize,
}

pub fn group_by_vehicle(flights: &[Flight], vehicles: &[Vehicle]) -> VehicleGrouping {
    let mut grouping = VehicleGrouping::default();
    for id in vehicles.iter().filter_map(|v| v.id.as_ref()) {
        grouping
            .flights_by_vehicle
            .entry(id.clone())
            .or_default();
    }

    for flight in flights {
        match flight.vehicle_id() {
            Some(id) => match grouping.flights_by_vehicle.get_mut(id) {
                Some(list) => list.push(flight.clone()),
                None => {
                    grouping.unmatched_vehicle_ids.insert(id.clone());
                    grouping.unassigned_flights += 1;
                }
            },
            None => grouping.unassigned_flights += 1,
        }
    }

    grouping
}

/// Number of distinct vehicle ids referenced by `flights`
pub fn unique_vehicle_count(flights: &[Flight]) -> usize {
    flights
        .iter()
        .filter_map(Flight::vehicle_id)
        .collect::<HashSet<_>>()
        .len()
}

/// Flight count per vehicle id
pub fn count_by_vehicle(flights: &[Flight]) -> BTreeMap<VehicleId, usize> {
    let mut counts = BTreeMap::new();
    for id in flights.iter().filter_map(Flight::vehicle_id) {
        *counts.entry(id.clone()).or_insert(0) += 1;
    }
    counts
}
