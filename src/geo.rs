use geo_types::LineString;

use crate::entities::Coordinates;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres. Missing or invalid points are
/// infinitely far away so radius filters exclude them.
pub fn distance_km(a: Option<Coordinates>, b: Option<Coordinates>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) if a.is_valid() && b.is_valid() => haversine(a.lat, a.lng, b.lat, b.lng),
        _ => f64::INFINITY,
    }
}

fn haversine(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Sum of the segment distances along a recorded path, `None` when the
/// path has fewer than two usable points.
pub fn path_distance_km(points: &[Coordinates]) -> Option<f64> {
    let line: LineString<f64> = points
        .iter()
        .filter(|p| p.is_valid())
        .map(|p| (p.lng, p.lat))
        .collect();

    if line.0.len() < 2 {
        return None;
    }

    Some(
        line.lines()
            .map(|segment| haversine(segment.start.y, segment.start.x, segment.end.y, segment.end.x))
            .sum(),
    )
}

pub fn round_km(distance: f64) -> f64 {
    (distance * 100.0).round() / 100.0
}
