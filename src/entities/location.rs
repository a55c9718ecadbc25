use serde::{Deserialize, Serialize};

use crate::error::{validation_error, Error};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }

    /// Rejects coordinates at ingestion instead of guessing an ordering later.
    pub fn validate(self) -> Result<Self, Error> {
        if !self.is_valid() {
            return Err(validation_error(format!(
                "invalid coordinates ({}, {})",
                self.lat, self.lng
            )));
        }

        Ok(self)
    }
}

impl From<Coordinates> for geo_types::Point<f64> {
    fn from(c: Coordinates) -> Self {
        geo_types::Point::new(c.lng, c.lat)
    }
}

impl From<Coordinates> for String {
    fn from(c: Coordinates) -> Self {
        format!("{},{}", c.lat, c.lng)
    }
}

/// Driver self-reported position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub bearing: Option<f64>,
}

impl Location {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lng)
    }
}

#[test]
fn coordinates_validation_test() {
    assert!(Coordinates::new(9.03, 38.74).validate().is_ok());
    assert!(Coordinates::new(91.0, 38.74).validate().is_err());
    assert!(Coordinates::new(9.03, -181.0).validate().is_err());
    assert!(Coordinates::new(f64::NAN, 38.74).validate().is_err());
}
