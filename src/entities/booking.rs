use chrono::{DateTime, Utc};
use oso::PolarClass;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Coordinates, VehicleType};
use crate::error::{conflict_error, validation_error, Error};
use crate::finance::{FareBreakdown, Settlement};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub passenger_id: Uuid,
    pub passenger_name: Option<String>,
    pub passenger_phone: Option<String>,
    pub driver_id: Option<Uuid>,
    pub vehicle_type: VehicleType,
    pub pickup: Coordinates,
    pub dropoff: Coordinates,
    pub status: Status,
    pub fare_estimated: Decimal,
    pub fare_final: Option<Decimal>,
    pub fare_breakdown: FareBreakdown,
    pub distance_km: f64,
    pub waiting_minutes: Option<i64>,
    pub commission: Option<Decimal>,
    pub driver_earnings: Option<Decimal>,
    pub start_location: Option<Coordinates>,
    pub end_location: Option<Coordinates>,
    pub cancellation: Option<Cancellation>,
    pub driver_rating: Option<Rating>,
    pub passenger_rating: Option<Rating>,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Status {
    Requested,
    Accepted,
    Ongoing,
    Completed,
    Canceled,
}

impl Status {
    pub fn name(&self) -> String {
        match self {
            Self::Requested => "requested".into(),
            Self::Accepted => "accepted".into(),
            Self::Ongoing => "ongoing".into(),
            Self::Completed => "completed".into(),
            Self::Canceled => "canceled".into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    /// A driver bound to a booking in one of these states is busy.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Accepted | Self::Ongoing)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanceledBy {
    Driver,
    Passenger,
    System,
}

/// The driver that was bound at cancellation time is kept here because
/// `driver_id` is cleared on cancel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cancellation {
    pub by: CanceledBy,
    pub reason: Option<String>,
    pub driver_id: Option<Uuid>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub score: u8,
    pub comment: Option<String>,
    pub at: DateTime<Utc>,
}

impl Rating {
    pub fn new(score: u8, comment: Option<String>) -> Result<Self, Error> {
        if !(1..=5).contains(&score) {
            return Err(validation_error("rating must be between 1 and 5"));
        }

        Ok(Self {
            score,
            comment,
            at: Utc::now(),
        })
    }
}

impl PolarClass for Booking {
    fn get_polar_class_builder() -> oso::ClassBuilder<Booking> {
        oso::Class::builder()
            .name("Booking")
            .add_attribute_getter("id", |recv: &Booking| recv.id.to_string())
            .add_attribute_getter("passenger_id", |recv: &Booking| {
                recv.passenger_id.to_string()
            })
            .add_attribute_getter("driver_id", |recv: &Booking| {
                recv.driver_id.map(|id| id.to_string()).unwrap_or_default()
            })
            .add_attribute_getter("status", |recv: &Booking| recv.status.name())
    }

    fn get_polar_class() -> oso::Class {
        let builder = Booking::get_polar_class_builder();
        builder.build()
    }
}

impl Booking {
    pub fn new(
        passenger_id: Uuid,
        vehicle_type: VehicleType,
        pickup: Coordinates,
        dropoff: Coordinates,
        distance_km: f64,
        fare_estimated: Decimal,
        fare_breakdown: FareBreakdown,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            passenger_id,
            passenger_name: None,
            passenger_phone: None,
            driver_id: None,
            vehicle_type,
            pickup,
            dropoff,
            status: Status::Requested,
            fare_estimated,
            fare_final: None,
            fare_breakdown,
            distance_km,
            waiting_minutes: None,
            commission: None,
            driver_earnings: None,
            start_location: None,
            end_location: None,
            cancellation: None,
            driver_rating: None,
            passenger_rating: None,
            created_at: Utc::now(),
            accepted_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_requested(&self) -> bool {
        self.status == Status::Requested
    }

    /// Fare a driver must be able to cover to take this booking.
    pub fn target_fare(&self) -> Decimal {
        self.fare_final.unwrap_or(self.fare_estimated)
    }

    pub fn is_passenger(&self, user_id: &Uuid) -> bool {
        &self.passenger_id == user_id
    }

    pub fn is_driver(&self, user_id: &Uuid) -> bool {
        self.driver_id.as_ref() == Some(user_id)
    }

    pub fn ensure_mutable(&self) -> Result<(), Error> {
        if self.status == Status::Completed {
            return Err(conflict_error("cannot modify completed booking"));
        }

        Ok(())
    }

    fn unexpected_status(&self, wanted: Status) -> Error {
        conflict_error(format!(
            "booking {} is {}, expected {}",
            self.id,
            self.status.name(),
            wanted.name()
        ))
    }

    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn accept(&mut self, driver_id: Uuid, at: DateTime<Utc>) -> Result<(), Error> {
        self.ensure_mutable()?;

        match self.status {
            Status::Requested => {
                self.status = Status::Accepted;
                self.driver_id = Some(driver_id);
                self.accepted_at = Some(at);
                Ok(())
            }
            _ => Err(self.unexpected_status(Status::Requested)),
        }
    }

    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn start(&mut self, start_location: Option<Coordinates>, at: DateTime<Utc>) -> Result<(), Error> {
        self.ensure_mutable()?;

        match self.status {
            Status::Accepted => {
                self.status = Status::Ongoing;
                self.started_at = Some(at);
                self.start_location = start_location;
                Ok(())
            }
            _ => Err(self.unexpected_status(Status::Accepted)),
        }
    }

    #[tracing::instrument(skip(self, settlement), fields(booking_id = %self.id))]
    pub fn complete(
        &mut self,
        settlement: &Settlement,
        end_location: Option<Coordinates>,
        at: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.ensure_mutable()?;

        match self.status {
            Status::Ongoing => {
                self.status = Status::Completed;
                self.fare_final = Some(settlement.fare);
                self.fare_breakdown = settlement.breakdown.clone();
                self.distance_km = settlement.distance_km;
                self.waiting_minutes = Some(settlement.waiting_minutes);
                self.commission = Some(settlement.commission);
                self.driver_earnings = Some(settlement.driver_earnings);
                self.end_location = end_location;
                self.completed_at = Some(at);
                Ok(())
            }
            _ => Err(self.unexpected_status(Status::Ongoing)),
        }
    }

    /// Returns the driver that was released, if any.
    #[tracing::instrument(skip(self), fields(booking_id = %self.id))]
    pub fn cancel(
        &mut self,
        by: CanceledBy,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<Uuid>, Error> {
        self.ensure_mutable()?;

        if self.status.is_terminal() {
            return Err(conflict_error(format!(
                "booking {} is already {}",
                self.id,
                self.status.name()
            )));
        }

        let freed_driver = self.driver_id.take();

        self.status = Status::Canceled;
        self.cancellation = Some(Cancellation {
            by,
            reason,
            driver_id: freed_driver,
            at,
        });

        Ok(freed_driver)
    }

    pub fn rate_driver(&mut self, rating: Rating) -> Result<(), Error> {
        self.ensure_rateable()?;
        if self.driver_rating.is_some() {
            return Err(conflict_error(format!("booking {} already rated the driver", self.id)));
        }

        self.driver_rating = Some(rating);
        Ok(())
    }

    pub fn rate_passenger(&mut self, rating: Rating) -> Result<(), Error> {
        self.ensure_rateable()?;
        if self.passenger_rating.is_some() {
            return Err(conflict_error(format!("booking {} already rated the passenger", self.id)));
        }

        self.passenger_rating = Some(rating);
        Ok(())
    }

    fn ensure_rateable(&self) -> Result<(), Error> {
        match self.status {
            Status::Completed => Ok(()),
            _ => Err(self.unexpected_status(Status::Completed)),
        }
    }
}
