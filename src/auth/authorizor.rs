use oso::{Oso, PolarClass};

use crate::auth::{Platform, User};
use crate::entities::Booking;
use crate::error::Error;

pub fn new() -> Result<Oso, Error> {
    let mut o = Oso::new();

    o.register_class(Platform::get_polar_class())?;
    o.register_class(User::get_polar_class())?;
    o.register_class(Booking::get_polar_class())?;

    o.load_str(include_str!("rules.polar"))?;

    Ok(o)
}

#[cfg(test)]
fn booking_for(passenger_id: uuid::Uuid) -> Booking {
    use crate::entities::{Coordinates, VehicleType};
    use crate::finance::FareBreakdown;
    use rust_decimal::Decimal;

    let origin = Coordinates::new(9.03, 38.74);
    let destination = Coordinates::new(9.05, 38.76);

    Booking::new(
        passenger_id,
        VehicleType::Mini,
        origin,
        destination,
        3.0,
        Decimal::from(5),
        FareBreakdown::default(),
    )
}

#[test]
fn platform_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let system = User::new_system_user();
    let result = authorizor.query_rule("has_role", (system.clone(), "system", Platform));
    assert!(result.unwrap().next().unwrap().is_ok());

    // system implies admin implies staff
    assert!(authorizor.is_allowed(system.clone(), "manage_pricing", Platform).unwrap());
    assert!(authorizor.is_allowed(system, "assign", Platform).unwrap());

    let passenger = User::passenger(Uuid::new_v4());
    assert!(authorizor.is_allowed(passenger.clone(), "create_booking", Platform).unwrap());
    assert!(!authorizor.is_allowed(passenger.clone(), "withdraw", Platform).unwrap());
    assert!(!authorizor.is_allowed(passenger, "assign", Platform).unwrap());

    let driver = User::driver(Uuid::new_v4());
    assert!(authorizor.is_allowed(driver.clone(), "withdraw", Platform).unwrap());
    assert!(!authorizor.is_allowed(driver.clone(), "create_booking", Platform).unwrap());
    assert!(!authorizor.is_allowed(driver, "manage_commission", Platform).unwrap());

    let staff = User::staff(Uuid::new_v4());
    assert!(authorizor.is_allowed(staff.clone(), "assign", Platform).unwrap());
    assert!(!authorizor.is_allowed(staff, "manage_wallets", Platform).unwrap());
}

#[test]
fn booking_passenger_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let passenger = User::passenger(Uuid::new_v4());
    let stranger = User::passenger(Uuid::new_v4());
    let booking = booking_for(passenger.id);

    let result = authorizor.query_rule("has_role", (passenger.clone(), "passenger", booking.clone()));
    assert!(result.unwrap().next().unwrap().is_ok());

    assert!(authorizor.is_allowed(passenger.clone(), "read", booking.clone()).unwrap());
    assert!(authorizor.is_allowed(passenger.clone(), "cancel", booking.clone()).unwrap());
    assert!(!authorizor.is_allowed(passenger.clone(), "complete", booking.clone()).unwrap());
    assert!(!authorizor.is_allowed(passenger, "accept", booking.clone()).unwrap());

    assert!(!authorizor.is_allowed(stranger.clone(), "read", booking.clone()).unwrap());
    assert!(!authorizor.is_allowed(stranger, "cancel", booking).unwrap());
}

#[test]
fn booking_candidate_and_driver_role_test() {
    use chrono::Utc;
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let driver = User::driver(Uuid::new_v4());
    let other_driver = User::driver(Uuid::new_v4());
    let mut booking = booking_for(Uuid::new_v4());

    // before acceptance every driver is a candidate

    let result = authorizor.query_rule("has_role", (driver.clone(), "driver", booking.clone()));
    assert!(result.unwrap().next().is_none());

    assert!(authorizor.is_allowed(driver.clone(), "accept", booking.clone()).unwrap());
    assert!(!authorizor.is_allowed(driver.clone(), "start", booking.clone()).unwrap());
    assert!(!authorizor.is_allowed(driver.clone(), "cancel", booking.clone()).unwrap());

    booking.accept(driver.id, Utc::now()).unwrap();

    // after acceptance only the bound driver drives the trip

    let result = authorizor.query_rule("has_role", (driver.clone(), "driver", booking.clone()));
    assert!(result.unwrap().next().unwrap().is_ok());

    assert!(authorizor.is_allowed(driver.clone(), "start", booking.clone()).unwrap());
    assert!(authorizor.is_allowed(driver.clone(), "complete", booking.clone()).unwrap());
    assert!(authorizor.is_allowed(driver.clone(), "cancel", booking.clone()).unwrap());
    assert!(authorizor.is_allowed(driver, "record_waypoint", booking.clone()).unwrap());

    assert!(!authorizor.is_allowed(other_driver.clone(), "start", booking.clone()).unwrap());
    assert!(!authorizor.is_allowed(other_driver.clone(), "complete", booking.clone()).unwrap());
    assert!(!authorizor.is_allowed(other_driver, "cancel", booking).unwrap());
}

#[test]
fn booking_staff_role_test() {
    use uuid::Uuid;

    let authorizor = new().unwrap();

    let unprivileged = User::new(Uuid::new_v4(), &[]);
    let staff = User::staff(Uuid::new_v4());
    let admin = User::admin(Uuid::new_v4());
    let booking = booking_for(Uuid::new_v4());

    assert!(!authorizor.is_allowed(unprivileged.clone(), "read", booking.clone()).unwrap());
    assert!(!authorizor.is_allowed(unprivileged, "cancel", booking.clone()).unwrap());

    for user in [staff, admin, User::new_system_user()] {
        assert!(authorizor.is_allowed(user.clone(), "read", booking.clone()).unwrap());
        assert!(authorizor.is_allowed(user.clone(), "cancel", booking.clone()).unwrap());
        assert!(authorizor.is_allowed(user.clone(), "complete", booking.clone()).unwrap());
        assert!(!authorizor.is_allowed(user, "rate_driver", booking.clone()).unwrap());
    }
}
