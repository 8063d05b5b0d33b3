//! Geofence checks for on-site check-in.

use crate::errors::ClinicError;

/// Mean Earth radius in meters.
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Reject coordinates outside the WGS84 range.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), ClinicError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(ClinicError::BadRequest(
            "latitude must be between -90 and 90".to_string(),
        ));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(ClinicError::BadRequest(
            "longitude must be between -180 and 180".to_string(),
        ));
    }
    Ok(())
}

/// Great-circle distance between two points (haversine).
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Succeeds when the patient is within `radius_meters` of the clinic.
pub fn ensure_within(
    patient: (f64, f64),
    clinic: (f64, f64),
    radius_meters: f64,
) -> Result<f64, ClinicError> {
    validate_coordinates(patient.0, patient.1)?;
    let distance = distance_meters(patient.0, patient.1, clinic.0, clinic.1);

    if distance <= radius_meters {
        Ok(distance)
    } else {
        Err(ClinicError::Geofence {
            distance_meters: distance,
            radius_meters,
        })
    }
}
