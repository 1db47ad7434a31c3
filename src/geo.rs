use crate::config::LatLon;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometers.
pub fn haversine_km(a: LatLon, b: LatLon) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Great-circle distance in meters.
pub fn haversine_m(a: LatLon, b: LatLon) -> f64 {
    haversine_km(a, b) * 1000.0
}

/// Whether `point` lies inside the center-zone disc.
pub fn in_center_zone(point: LatLon, center: LatLon, radius_km: f64) -> bool {
    haversine_km(point, center) <= radius_km
}

/// Whether `point` lies inside the city-traffic disc. Same mechanism as the
/// center zone, separate parameters.
pub fn in_city_zone(point: LatLon, city_center: LatLon, city_radius_km: f64) -> bool {
    haversine_km(point, city_center) <= city_radius_km
}
