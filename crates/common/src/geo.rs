// Great-circle distance on the WGS84 sphere approximation.

/// Mean Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance in kilometers between two latitude/longitude
/// points given in degrees.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

#[cfg(test)]
mod tests {
    use super::haversine_km;

    #[test]
    fn zero_distance_for_identical_points() {
        assert_eq!(haversine_km(54.6872, 25.2797, 54.6872, 25.2797), 0.0);
    }

    #[test]
    fn one_millidegree_of_latitude_is_about_111_meters() {
        let km = haversine_km(54.0, 25.0, 54.001, 25.0);
        assert!((km - 0.111).abs() < 0.001, "got {km} km");
    }

    #[test]
    fn vilnius_to_kaunas_is_about_92_km() {
        let km = haversine_km(54.6872, 25.2797, 54.8985, 23.9036);
        assert!((km - 92.0).abs() < 2.0, "got {km} km");
    }

    #[test]
    fn distance_is_symmetric() {
        let there = haversine_km(54.0, 25.0, 55.0, 26.0);
        let back = haversine_km(55.0, 26.0, 54.0, 25.0);
        assert!((there - back).abs() < 1e-9);
    }
}
