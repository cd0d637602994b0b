//! Geography points and distance math.
//!
//! Points arrive in three shapes: GeoJSON objects
//! (`{"type": "Point", "coordinates": [lon, lat]}`), OData geography literals
//! (`geography'POINT(lon lat)'`), and the bare `lat,lon` pair used by scoring
//! parameters. All three parse into [`GeoPoint`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS-84 geography point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

impl GeoPoint {
    /// Create a point from latitude and longitude.
    #[must_use]
    pub const fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Parse a GeoJSON point value. Coordinates are `[lon, lat]` per the
    /// GeoJSON order.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let kind = obj.get("type")?.as_str()?;
        if !kind.eq_ignore_ascii_case("point") {
            return None;
        }
        let coords = obj.get("coordinates")?.as_array()?;
        if coords.len() != 2 {
            return None;
        }
        let lon = coords[0].as_f64()?;
        let lat = coords[1].as_f64()?;
        Some(Self { lat, lon })
    }

    /// Parse an OData geography literal: `geography'POINT(lon lat)'`.
    #[must_use]
    pub fn from_literal(literal: &str) -> Option<Self> {
        let trimmed = literal.trim();
        let lower = trimmed.to_ascii_lowercase();
        let rest = lower.strip_prefix("geography'")?.strip_suffix('\'')?;
        let inner = rest.trim().strip_prefix("point(")?.strip_suffix(')')?;
        let mut parts = inner.split_whitespace();
        let lon: f64 = parts.next()?.parse().ok()?;
        let lat: f64 = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self { lat, lon })
    }

    /// Parse the `lat,lon` scoring-parameter form. Negative coordinates are
    /// routine here (`-47.6,-122.3`).
    #[must_use]
    pub fn from_param(param: &str) -> Option<Self> {
        let (lat, lon) = param.split_once(',')?;
        let lat: f64 = lat.trim().parse().ok()?;
        let lon: f64 = lon.trim().parse().ok()?;
        Some(Self { lat, lon })
    }

    /// Haversine great-circle distance to another point, in kilometers.
    #[must_use]
    pub fn distance_km(&self, other: &Self) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();
        EARTH_RADIUS_KM * c
    }

    /// GeoJSON representation.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "type": "Point",
            "coordinates": [self.lon, self.lat],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_geojson() {
        let value = json!({"type": "Point", "coordinates": [-122.3, 47.6]});
        let point = GeoPoint::from_value(&value).expect("parses");
        assert!((point.lat - 47.6).abs() < 1e-9);
        assert!((point.lon + 122.3).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_points() {
        assert!(GeoPoint::from_value(&json!({"type": "Polygon", "coordinates": []})).is_none());
        assert!(GeoPoint::from_value(&json!("POINT(1 2)")).is_none());
        assert!(GeoPoint::from_value(&json!({"type": "Point", "coordinates": [1.0]})).is_none());
    }

    #[test]
    fn parses_odata_literal() {
        let point = GeoPoint::from_literal("geography'POINT(-122.131577 47.678581)'").unwrap();
        assert!((point.lon + 122.131_577).abs() < 1e-9);
        assert!((point.lat - 47.678_581).abs() < 1e-9);
    }

    #[test]
    fn parses_param_form_with_negatives() {
        let point = GeoPoint::from_param("-47.6,-122.3").unwrap();
        assert!((point.lat + 47.6).abs() < 1e-9);
        assert!((point.lon + 122.3).abs() < 1e-9);
    }

    #[test]
    fn haversine_known_distance() {
        // Seattle to Portland is roughly 234 km.
        let seattle = GeoPoint::new(47.6062, -122.3321);
        let portland = GeoPoint::new(45.5152, -122.6784);
        let distance = seattle.distance_km(&portland);
        assert!((distance - 234.0).abs() < 5.0, "got {distance}");
    }

    #[test]
    fn zero_distance_to_self() {
        let point = GeoPoint::new(10.0, 20.0);
        assert!(point.distance_km(&point) < 1e-9);
    }
}
