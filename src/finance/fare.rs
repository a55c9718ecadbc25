use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::round_money;
use crate::entities::VehicleType;
use crate::error::{validation_error, Error};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingRecord {
    pub vehicle_type: VehicleType,
    pub base_fare: Decimal,
    pub per_km: Decimal,
    pub per_minute: Decimal,
    pub waiting_per_minute: Decimal,
    pub surge_multiplier: Decimal,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl PricingRecord {
    pub fn new(vehicle_type: VehicleType) -> Self {
        Self {
            vehicle_type,
            base_fare: Decimal::from(2),
            per_km: Decimal::ONE,
            per_minute: Decimal::new(2, 1),
            waiting_per_minute: Decimal::new(1, 1),
            surge_multiplier: Decimal::ONE,
            is_active: true,
            updated_at: Utc::now(),
        }
    }

    pub fn validate(self) -> Result<Self, Error> {
        let rates = [
            self.base_fare,
            self.per_km,
            self.per_minute,
            self.waiting_per_minute,
        ];

        if rates.iter().any(|r| r.is_sign_negative()) {
            return Err(validation_error("pricing rates must not be negative"));
        }

        if self.surge_multiplier <= Decimal::ZERO {
            return Err(validation_error("surge multiplier must be positive"));
        }

        Ok(self)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FareBreakdown {
    pub base: Decimal,
    pub distance_cost: Decimal,
    pub time_cost: Decimal,
    pub waiting_cost: Decimal,
    pub surge_multiplier: Decimal,
    pub discount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FareQuote {
    pub distance_km: f64,
    pub fare: Decimal,
    pub breakdown: FareBreakdown,
}

/// `max(base + d*per_km + w*waiting_per_minute, minimum) * surge - discount`,
/// never below `minimum`.
pub fn estimate_fare(
    pricing: &PricingRecord,
    distance_km: f64,
    waiting_minutes: i64,
    surge_multiplier: Option<Decimal>,
    discount: Decimal,
    minimum_fare: Decimal,
) -> Result<(Decimal, FareBreakdown), Error> {
    let distance = Decimal::try_from(distance_km)
        .ok()
        .filter(|d| !d.is_sign_negative())
        .ok_or_else(|| validation_error(format!("invalid distance {}", distance_km)))?;

    let surge = surge_multiplier.unwrap_or(pricing.surge_multiplier);
    if surge <= Decimal::ZERO {
        return Err(validation_error("surge multiplier must be positive"));
    }

    if discount.is_sign_negative() {
        return Err(validation_error("discount must not be negative"));
    }

    let breakdown = FareBreakdown {
        base: pricing.base_fare,
        distance_cost: round_money(distance * pricing.per_km),
        time_cost: Decimal::ZERO,
        waiting_cost: round_money(Decimal::from(waiting_minutes.max(0)) * pricing.waiting_per_minute),
        surge_multiplier: surge,
        discount,
    };

    let subtotal = (breakdown.base + distance * pricing.per_km + breakdown.waiting_cost)
        .max(minimum_fare);
    let fare = (subtotal * surge - discount).max(minimum_fare);

    Ok((round_money(fare), breakdown))
}
