//! Great-circle distance

use crate::types::Position;

/// Mean Earth radius used by the haversine formula (meters)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Haversine distance between two positions in meters
pub fn haversine_distance(a: Position, b: Position) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let d_phi = (b.lat - a.lat).to_radians();
    let d_lambda = (b.lng - a.lng).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Rounding can push h a hair above 1 for antipodal points
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

/// Position `meters` due north of `origin`
pub fn offset_north(origin: Position, meters: f64) -> Position {
    let d_lat = (meters / EARTH_RADIUS_M).to_degrees();
    Position::new(origin.lat + d_lat, origin.lng)
}
