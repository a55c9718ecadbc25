use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::entities::Location;
use crate::error::{conflict_error, validation_error, Error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleType {
    Mini,
    Sedan,
    Van,
}

impl VehicleType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mini => "mini",
            Self::Sedan => "sedan",
            Self::Van => "van",
        }
    }
}

impl fmt::Display for VehicleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VehicleType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mini" => Ok(Self::Mini),
            "sedan" => Ok(Self::Sedan),
            "van" => Ok(Self::Van),
            other => Err(validation_error(format!("unknown vehicle type {}", other))),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Driver {
    pub id: Uuid,
    pub vehicle_type: VehicleType,
    pub available: bool,
    pub active_booking_id: Option<Uuid>,
    pub last_known_location: Option<Location>,
    pub location_updated_at: Option<DateTime<Utc>>,
    pub rating: Option<f64>,
    pub rating_count: u32,
}

impl Driver {
    pub fn new(id: Uuid, vehicle_type: VehicleType) -> Self {
        Self {
            id,
            vehicle_type,
            available: false,
            active_booking_id: None,
            last_known_location: None,
            location_updated_at: None,
            rating: None,
            rating_count: 0,
        }
    }

    pub fn can_be_bound(&self) -> bool {
        self.available && self.active_booking_id.is_none()
    }

    /// Check-and-set of the single active booking.
    #[tracing::instrument(skip(self), fields(driver_id = %self.id))]
    pub fn bind(&mut self, booking_id: Uuid) -> Result<(), Error> {
        if let Some(active) = self.active_booking_id {
            return Err(conflict_error(format!(
                "driver {} already has active booking {}",
                self.id, active
            )));
        }

        if !self.available {
            return Err(conflict_error(format!("driver {} is not available", self.id)));
        }

        self.available = false;
        self.active_booking_id = Some(booking_id);

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(driver_id = %self.id))]
    pub fn release(&mut self, booking_id: Uuid) {
        if self.active_booking_id == Some(booking_id) {
            self.active_booking_id = None;
        }

        self.available = self.active_booking_id.is_none();
    }

    pub fn set_available(&mut self, available: bool) -> Result<(), Error> {
        if available {
            if let Some(active) = self.active_booking_id {
                return Err(conflict_error(format!(
                    "driver {} is busy with booking {}",
                    self.id, active
                )));
            }
        }

        self.available = available;
        Ok(())
    }

    pub fn report_location(&mut self, location: Location, at: DateTime<Utc>) {
        self.last_known_location = Some(location);
        self.location_updated_at = Some(at);
    }

    pub fn add_rating(&mut self, score: u8) {
        let total = self.rating.unwrap_or(0.0) * self.rating_count as f64 + score as f64;
        self.rating_count += 1;
        self.rating = Some(total / self.rating_count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_is_exclusive() {
        let mut driver = Driver::new(Uuid::new_v4(), VehicleType::Mini);
        assert!(driver.bind(Uuid::new_v4()).unwrap_err().is_conflict_error());

        driver.set_available(true).unwrap();
        let first = Uuid::new_v4();
        driver.bind(first).unwrap();
        assert!(!driver.available);

        assert!(driver.bind(Uuid::new_v4()).unwrap_err().is_conflict_error());
        assert!(driver.set_available(true).unwrap_err().is_conflict_error());

        driver.release(first);
        assert!(driver.can_be_bound());
    }

    #[test]
    fn releasing_another_booking_keeps_driver_busy() {
        let mut driver = Driver::new(Uuid::new_v4(), VehicleType::Van);
        driver.set_available(true).unwrap();

        let active = Uuid::new_v4();
        driver.bind(active).unwrap();
        driver.release(Uuid::new_v4());

        assert_eq!(driver.active_booking_id, Some(active));
        assert!(!driver.available);
    }

    #[test]
    fn rating_is_a_running_average() {
        let mut driver = Driver::new(Uuid::new_v4(), VehicleType::Sedan);
        driver.add_rating(5);
        driver.add_rating(4);
        driver.add_rating(3);

        assert_eq!(driver.rating, Some(4.0));
        assert_eq!(driver.rating_count, 3);
    }

    #[test]
    fn vehicle_type_parsing() {
        assert_eq!("Mini".parse::<VehicleType>().unwrap(), VehicleType::Mini);
        assert_eq!(" van ".parse::<VehicleType>().unwrap(), VehicleType::Van);
        assert!("bike".parse::<VehicleType>().unwrap_err().is_validation_error());
    }
}
