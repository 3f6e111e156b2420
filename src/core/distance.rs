use crate::models::{Coordinate, StageStats};
use geo::{GeodesicDistance, Point};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Earth's radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Distances and thresholds are compared at this resolution (1 mm)
/// Floating point slack on the threshold comparison (one micrometre)
const THRESHOLD_TOLERANCE_KM: f64 = 1e-9;

/// Calculate the Haversine distance between two points in kilometers
///
/// # Arguments
/// * `lat1` - Latitude of first point in degrees
/// * `lon1` - Longitude of first point in degrees
/// * `lat2` - Latitude of second point in degrees
/// * `lon2` - Longitude of second point in degrees
///
/// # Returns
/// Distance in kilometers
#[inline]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Calculate the distance on the WGS-84 ellipsoid between two points in kilometers
#[inline]
pub fn geodesic_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let from = Point::new(lon1, lat1);
    let to = Point::new(lon2, lat2);
    from.geodesic_distance(&to) / 1000.0
}

/// Formula used to measure great-circle distance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMethod {
    #[default]
    Geodesic,
    Haversine,
}

impl DistanceMethod {
    pub fn distance_km(&self, from: Coordinate, to: Coordinate) -> f64 {
        match self {
            DistanceMethod::Geodesic => {
                geodesic_distance(from.latitude, from.longitude, to.latitude, to.longitude)
            }
            DistanceMethod::Haversine => {
                haversine_distance(from.latitude, from.longitude, to.latitude, to.longitude)
            }
        }
    }
}

/// Inclusive `distance <= threshold`, absorbing floating point noise only
#[inline]
pub fn is_within_threshold(distance_km: f64, threshold_km: f64) -> bool {
    distance_km <= threshold_km + THRESHOLD_TOLERANCE_KM
}

/// Distance of one coordinate from the reference, plus the threshold verdict
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceVerdict {
    pub distance_km: f64,
    pub within: bool,
}

type CoordinateBits = (u64, u64);

fn bits(coordinate: Coordinate) -> CoordinateBits {
    (coordinate.latitude.to_bits(), coordinate.longitude.to_bits())
}

/// Memoized distance calculator for the last pipeline stage
///
/// Keyed by the exact bit patterns of `(coordinate, reference)`, so many
/// records geocoded onto the same point share one computation.
#[derive(Debug, Default)]
pub struct DistanceEvaluator {
    method: DistanceMethod,
    memo: HashMap<(CoordinateBits, CoordinateBits), f64>,
    stats: StageStats,
}

impl DistanceEvaluator {
    pub fn new(method: DistanceMethod) -> Self {
        Self {
            method,
            memo: HashMap::new(),
            stats: StageStats::default(),
        }
    }

    pub fn method(&self) -> DistanceMethod {
        self.method
    }

    pub fn distance_km(&mut self, coordinate: Coordinate, reference: Coordinate) -> f64 {
        self.stats.lookups += 1;
        let method = self.method;
        let stats = &mut self.stats;

        *self
            .memo
            .entry((bits(coordinate), bits(reference)))
            .or_insert_with(|| {
                stats.misses += 1;
                method.distance_km(coordinate, reference)
            })
    }

    pub fn evaluate(
        &mut self,
        coordinate: Coordinate,
        reference: Coordinate,
        threshold_km: f64,
    ) -> DistanceVerdict {
        let distance_km = self.distance_km(coordinate, reference);
        DistanceVerdict {
            distance_km,
            within: is_within_threshold(distance_km, threshold_km),
        }
    }

    pub fn within_radius(
        &mut self,
        coordinate: Coordinate,
        reference: Coordinate,
        threshold_km: f64,
    ) -> bool {
        self.evaluate(coordinate, reference, threshold_km).within
    }

    pub fn len(&self) -> usize {
        self.memo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    /// Drop the memo and return the counters gathered since the last call
    pub fn finish(&mut self) -> StageStats {
        self.memo = HashMap::new();
        std::mem::take(&mut self.stats)
    }
}
