use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{Booking, Coordinates};
use crate::finance::Settlement;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Waypoint {
    pub lat: f64,
    pub lng: f64,
    pub at: DateTime<Utc>,
}

/// Running record of a trip from start to completion, keyed by booking id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TripLog {
    pub booking_id: Uuid,
    pub driver_id: Uuid,
    pub passenger_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub waypoints: Vec<Waypoint>,
    pub distance_km: Option<f64>,
    pub waiting_minutes: Option<i64>,
    pub fare: Option<Decimal>,
    pub commission: Option<Decimal>,
    pub net_income: Option<Decimal>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TripLog {
    pub fn start(booking: &Booking, driver_id: Uuid, started_at: DateTime<Utc>) -> Self {
        let waypoints = booking
            .start_location
            .map(|c| Waypoint {
                lat: c.lat,
                lng: c.lng,
                at: started_at,
            })
            .into_iter()
            .collect();

        Self {
            booking_id: booking.id,
            driver_id,
            passenger_id: booking.passenger_id,
            started_at,
            waypoints,
            distance_km: None,
            waiting_minutes: None,
            fare: None,
            commission: None,
            net_income: None,
            completed_at: None,
        }
    }

    pub fn record(&mut self, point: Coordinates, at: DateTime<Utc>) {
        self.waypoints.push(Waypoint {
            lat: point.lat,
            lng: point.lng,
            at,
        });
    }

    pub fn path(&self) -> Vec<Coordinates> {
        self.waypoints
            .iter()
            .map(|w| Coordinates::new(w.lat, w.lng))
            .collect()
    }

    pub fn summarize(&mut self, settlement: &Settlement, completed_at: DateTime<Utc>) {
        self.distance_km = Some(settlement.distance_km);
        self.waiting_minutes = Some(settlement.waiting_minutes);
        self.fare = Some(settlement.fare);
        self.commission = Some(settlement.commission);
        self.net_income = Some(settlement.driver_earnings);
        self.completed_at = Some(completed_at);
    }
}
