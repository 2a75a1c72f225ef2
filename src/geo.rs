//! Great-circle distance between two WGS84 coordinates.

/// Mean Earth radius used by [`haversine`].
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometres between two points given in degrees.
///
/// Never fails: NaN inputs propagate to a NaN result.
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}
