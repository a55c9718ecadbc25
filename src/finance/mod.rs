//! Fare, commission and package arithmetic. Everything here is pure.

mod fare;
mod settlement;

pub use fare::{estimate_fare, FareBreakdown, FareQuote, PricingRecord};
pub use settlement::{settle, trip_distance_km, waiting_minutes, Settlement, SettlementInput};

use rust_decimal::{Decimal, RoundingStrategy};

pub fn calculate_commission(fare: Decimal, rate_percent: Decimal) -> Decimal {
    fare * rate_percent / Decimal::ONE_HUNDRED
}

pub fn calculate_net_earnings(fare: Decimal, rate_percent: Decimal) -> Decimal {
    fare - calculate_commission(fare, rate_percent)
}

/// Converts a provider deposit into package credit. Zero means the deposit
/// cannot be converted at this rate.
pub fn calculate_package(provider_deposit: Decimal, rate_percent: Decimal) -> Decimal {
    if rate_percent <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    provider_deposit * Decimal::ONE_HUNDRED / rate_percent
}

/// Equal balance is not enough.
pub fn can_accept_booking(package_balance: Decimal, fare: Decimal) -> bool {
    package_balance > fare
}

pub fn calculate_net_income_totals(total_fare: Decimal, total_commission: Decimal) -> Decimal {
    total_fare - total_commission
}

/// Currency precision, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
