use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::Booking;
use crate::error::{validation_error, Error};
use crate::finance::Settlement;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub percentage: Decimal,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Commission {
    pub fn new(
        driver_id: Uuid,
        percentage: Decimal,
        description: Option<String>,
        created_by: Uuid,
    ) -> Result<Self, Error> {
        if percentage.is_sign_negative() || percentage > Decimal::ONE_HUNDRED {
            return Err(validation_error("commission percentage must be within [0, 100]"));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            driver_id,
            percentage,
            description,
            created_by,
            created_at: Utc::now(),
        })
    }
}

/// Most recently created record wins.
pub fn latest_commission(records: impl IntoIterator<Item = Commission>) -> Option<Commission> {
    records
        .into_iter()
        .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
}

/// Append-only, one per completed booking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverEarnings {
    pub booking_id: Uuid,
    pub driver_id: Uuid,
    pub passenger_id: Uuid,
    pub trip_date: DateTime<Utc>,
    pub gross_fare: Decimal,
    pub commission_amount: Decimal,
    pub net_earnings: Decimal,
    pub commission_percentage: Decimal,
}

/// Append-only, one per completed booking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdminEarnings {
    pub booking_id: Uuid,
    pub driver_id: Uuid,
    pub passenger_id: Uuid,
    pub trip_date: DateTime<Utc>,
    pub gross_fare: Decimal,
    pub commission_earned: Decimal,
    pub commission_percentage: Decimal,
}

pub fn earnings_rows(
    booking: &Booking,
    driver_id: Uuid,
    settlement: &Settlement,
    trip_date: DateTime<Utc>,
) -> (DriverEarnings, AdminEarnings) {
    (
        DriverEarnings {
            booking_id: booking.id,
            driver_id,
            passenger_id: booking.passenger_id,
            trip_date,
            gross_fare: settlement.fare,
            commission_amount: settlement.commission,
            net_earnings: settlement.driver_earnings,
            commission_percentage: settlement.commission_rate,
        },
        AdminEarnings {
            booking_id: booking.id,
            driver_id,
            passenger_id: booking.passenger_id,
            trip_date,
            gross_fare: settlement.fare,
            commission_earned: settlement.commission,
            commission_percentage: settlement.commission_rate,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn latest_record_wins() {
        let driver_id = Uuid::new_v4();
        let admin = Uuid::new_v4();

        let mut old = Commission::new(driver_id, dec!(10), None, admin).unwrap();
        old.created_at = Utc::now() - Duration::days(30);
        let new = Commission::new(driver_id, dec!(12), None, admin).unwrap();

        let latest = latest_commission(vec![new.clone(), old]).unwrap();
        assert_eq!(latest.percentage, dec!(12));

        assert!(latest_commission(Vec::new()).is_none());
    }

    #[test]
    fn percentage_must_be_in_range() {
        let id = Uuid::new_v4();
        assert!(Commission::new(id, dec!(-1), None, id).is_err());
        assert!(Commission::new(id, dec!(100.5), None, id).is_err());
        assert!(Commission::new(id, dec!(100), None, id).is_ok());
    }
}
