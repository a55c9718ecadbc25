use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{calculate_commission, estimate_fare, round_money, FareBreakdown, PricingRecord};
use crate::entities::Coordinates;
use crate::error::{validation_error, Error};
use crate::geo::{distance_km, path_distance_km};

/// Everything the orchestrator knows about a finished trip.
#[derive(Clone, Debug)]
pub struct SettlementInput<'a> {
    pub pricing: &'a PricingRecord,
    pub distance_km: f64,
    pub waiting_minutes: i64,
    pub surge_multiplier: Option<Decimal>,
    pub discount: Decimal,
    pub minimum_fare: Decimal,
    pub commission_rate: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub fare: Decimal,
    pub breakdown: FareBreakdown,
    pub distance_km: f64,
    pub waiting_minutes: i64,
    pub commission_rate: Decimal,
    pub commission: Decimal,
    pub driver_earnings: Decimal,
}

pub fn settle(input: SettlementInput<'_>) -> Result<Settlement, Error> {
    if input.commission_rate.is_sign_negative() || input.commission_rate > Decimal::ONE_HUNDRED {
        return Err(validation_error("commission rate must be within [0, 100]"));
    }

    let (fare, breakdown) = estimate_fare(
        input.pricing,
        input.distance_km,
        input.waiting_minutes,
        input.surge_multiplier,
        input.discount,
        input.minimum_fare,
    )?;

    // net is derived from the rounded commission so the two always add up to the fare
    let commission = round_money(calculate_commission(fare, input.commission_rate));
    let driver_earnings = fare - commission;

    Ok(Settlement {
        fare,
        breakdown,
        distance_km: input.distance_km,
        waiting_minutes: input.waiting_minutes,
        commission_rate: input.commission_rate,
        commission,
        driver_earnings,
    })
}

/// Recorded path first, then start/end of the actual trip, then the
/// straight line between the booked pickup and dropoff.
pub fn trip_distance_km(
    waypoints: &[Coordinates],
    start: Option<Coordinates>,
    end: Option<Coordinates>,
    pickup: Coordinates,
    dropoff: Coordinates,
) -> f64 {
    if let Some(distance) = path_distance_km(waypoints) {
        return distance;
    }

    let direct = distance_km(start, end);
    if direct.is_finite() {
        return direct;
    }

    distance_km(Some(pickup), Some(dropoff))
}

pub fn waiting_minutes(started_at: Option<DateTime<Utc>>, completed_at: DateTime<Utc>) -> i64 {
    match started_at {
        Some(started_at) => {
            let seconds = (completed_at - started_at).num_seconds();
            ((seconds as f64) / 60.0).round().max(0.0) as i64
        }
        None => 0,
    }
}
