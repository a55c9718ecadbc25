mod common;

use common::{dropoff, pickup, Harness, PLATFORM_ID};

use rust_decimal_macros::dec;
use std::time::Duration;

use ridecore::api::{BookingAPI, CompletionOptions, DriverAPI, NearbyQuery, TransitionExtra, TripAPI};
use ridecore::auth::User;
use ridecore::db::Table;
use ridecore::entities::{BookingStatus, CanceledBy, Coordinates, Role, VehicleType};
use ridecore::notify::{booking_channel, driver_channel, events, passenger_channel};

fn accept_as(driver: &User) -> TransitionExtra {
    TransitionExtra {
        driver_id: Some(driver.id),
        ..TransitionExtra::default()
    }
}

#[tokio::test]
async fn estimate_uses_great_circle_distance() {
    let h = Harness::new().await;

    let quote = h
        .engine
        .estimate_fare(VehicleType::Mini, pickup(), dropoff())
        .await
        .unwrap();

    assert!((quote.distance_km - 3.13).abs() < 0.011, "got {}", quote.distance_km);
    assert_eq!(quote.fare, dec!(5.13));
    assert_eq!(quote.breakdown.base, dec!(2));
    assert_eq!(quote.breakdown.time_cost, dec!(0));
}

#[tokio::test]
async fn estimate_rejects_bad_coordinates_and_missing_pricing() {
    let h = Harness::new().await;

    let err = h
        .engine
        .estimate_fare(VehicleType::Mini, Coordinates::new(91.0, 0.0), dropoff())
        .await
        .unwrap_err();
    assert!(err.is_validation_error());

    let mut pricing = ridecore::finance::PricingRecord::new(VehicleType::Van);
    pricing.is_active = false;
    ridecore::api::FinanceAPI::set_pricing(&*h.engine, h.admin(), pricing)
        .await
        .unwrap();

    let err = h
        .engine
        .estimate_fare(VehicleType::Van, pickup(), dropoff())
        .await
        .unwrap_err();
    assert!(err.is_not_found_error());
}

#[tokio::test]
async fn full_trip_settles_wallets_and_stops_tracking() {
    let h = Harness::new().await;
    let driver = h.driver_at(VehicleType::Mini, Coordinates::new(9.031, 38.741), dec!(100)).await;
    let passenger = h.passenger();

    let booking = h
        .engine
        .create_booking(passenger.clone(), VehicleType::Mini, pickup(), dropoff())
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Requested);
    assert_eq!(booking.fare_estimated, dec!(5.13));
    assert_eq!(h.notifier.count(&driver_channel(&driver.id), events::BOOKING_NEW), 1);

    let accepted = h
        .engine
        .transition_booking(driver.clone(), booking.id, BookingStatus::Accepted, accept_as(&driver))
        .await
        .unwrap();
    assert_eq!(accepted.driver_id, Some(driver.id));
    assert_eq!(
        h.notifier.count(&passenger_channel(&passenger.id), events::BOOKING_ACCEPTED),
        1
    );

    let bound = h.engine.find_driver(driver.clone(), driver.id).await.unwrap();
    assert!(!bound.available);
    assert_eq!(bound.active_booking_id, Some(booking.id));

    h.engine
        .transition_booking(
            driver.clone(),
            booking.id,
            BookingStatus::Ongoing,
            TransitionExtra {
                start_location: Some(pickup()),
                ..TransitionExtra::default()
            },
        )
        .await
        .unwrap();
    assert!(h.engine.tracker().is_tracking(booking.id));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(h.notifier.count(&booking_channel(&booking.id), events::POSITION_UPDATE) >= 1);

    let completed = h
        .engine
        .complete_trip(driver.clone(), booking.id, Some(dropoff()), CompletionOptions::default())
        .await
        .unwrap();

    assert_eq!(completed.status, BookingStatus::Completed);
    assert_eq!(completed.fare_final, Some(dec!(5.13)));
    assert_eq!(completed.commission, Some(dec!(0.77)));
    assert_eq!(completed.driver_earnings, Some(dec!(4.36)));
    assert!(!h.engine.tracker().is_tracking(booking.id));

    assert_eq!(h.balance(driver.id, Role::Driver).await, dec!(104.36));
    assert_eq!(h.balance(PLATFORM_ID, Role::Admin).await, dec!(0.77));

    let released = h.engine.find_driver(driver.clone(), driver.id).await.unwrap();
    assert!(released.available);
    assert_eq!(released.active_booking_id, None);

    assert_eq!(h.rows(Table::DriverEarnings).await, 1);
    assert_eq!(h.rows(Table::AdminEarnings).await, 1);
    assert_eq!(
        h.notifier.count(&passenger_channel(&passenger.id), events::TRIP_COMPLETED),
        1
    );
}

#[tokio::test]
async fn waypoints_drive_the_settled_distance() {
    let h = Harness::new().await;
    h.price(VehicleType::Sedan, dec!(0), dec!(10)).await;
    let driver = h.driver_at(VehicleType::Sedan, pickup(), dec!(1000)).await;
    let passenger = h.passenger();

    let booking = h
        .engine
        .create_booking(passenger.clone(), VehicleType::Sedan, pickup(), dropoff())
        .await
        .unwrap();

    h.engine
        .transition_booking(driver.clone(), booking.id, BookingStatus::Accepted, accept_as(&driver))
        .await
        .unwrap();

    let err = h
        .engine
        .record_trip_waypoint(driver.clone(), booking.id, pickup())
        .await
        .unwrap_err();
    assert!(err.is_conflict_error());

    h.engine
        .transition_booking(driver.clone(), booking.id, BookingStatus::Ongoing, TransitionExtra::default())
        .await
        .unwrap();

    // there and back along the same line, twice the direct distance
    for point in [pickup(), dropoff(), pickup()] {
        h.engine
            .record_trip_waypoint(driver.clone(), booking.id, point)
            .await
            .unwrap();
    }

    let completed = h
        .engine
        .complete_trip(driver.clone(), booking.id, None, CompletionOptions::default())
        .await
        .unwrap();

    assert!((completed.distance_km - 6.2512).abs() < 0.02, "got {}", completed.distance_km);
    assert!(completed.fare_final.unwrap() > dec!(62));
}

#[tokio::test]
async fn fifteen_percent_of_a_thousand() {
    let h = Harness::new().await;
    h.price(VehicleType::Van, dec!(1000), dec!(0)).await;
    let driver = h.driver_at(VehicleType::Van, pickup(), dec!(1500)).await;
    let passenger = h.passenger();

    let booking = h
        .engine
        .create_booking(passenger.clone(), VehicleType::Van, pickup(), dropoff())
        .await
        .unwrap();

    h.engine
        .transition_booking(driver.clone(), booking.id, BookingStatus::Accepted, accept_as(&driver))
        .await
        .unwrap();
    h.engine
        .transition_booking(driver.clone(), booking.id, BookingStatus::Ongoing, TransitionExtra::default())
        .await
        .unwrap();

    let completed = h
        .engine
        .transition_booking(driver.clone(), booking.id, BookingStatus::Completed, TransitionExtra::default())
        .await
        .unwrap();

    assert_eq!(completed.fare_final, Some(dec!(1000)));
    assert_eq!(completed.commission, Some(dec!(150)));
    assert_eq!(completed.driver_earnings, Some(dec!(850)));

    let again = h
        .engine
        .complete_trip(driver.clone(), booking.id, None, CompletionOptions::default())
        .await
        .unwrap_err();
    assert!(again.is_conflict_error());
    assert!(again.message.contains("cannot modify completed booking"));

    let cancel = h
        .engine
        .transition_booking(passenger.clone(), booking.id, BookingStatus::Canceled, TransitionExtra::default())
        .await
        .unwrap_err();
    assert!(cancel.is_conflict_error());

    assert_eq!(h.rows(Table::DriverEarnings).await, 1);
    assert_eq!(h.rows(Table::AdminEarnings).await, 1);
    assert_eq!(h.balance(driver.id, Role::Driver).await, dec!(2350));
    assert_eq!(h.balance(PLATFORM_ID, Role::Admin).await, dec!(150));
}

#[tokio::test]
async fn passenger_wallet_pays_when_asked() {
    let h = Harness::new().await;
    h.price(VehicleType::Van, dec!(100), dec!(0)).await;
    let driver = h.driver_at(VehicleType::Van, pickup(), dec!(500)).await;
    let passenger = h.passenger();

    let booking = h
        .engine
        .create_booking(passenger.clone(), VehicleType::Van, pickup(), dropoff())
        .await
        .unwrap();

    h.engine
        .transition_booking(driver.clone(), booking.id, BookingStatus::Accepted, accept_as(&driver))
        .await
        .unwrap();
    h.engine
        .transition_booking(driver.clone(), booking.id, BookingStatus::Ongoing, TransitionExtra::default())
        .await
        .unwrap();
    h.engine
        .complete_trip(
            driver.clone(),
            booking.id,
            None,
            CompletionOptions {
                debit_passenger_wallet: true,
                ..CompletionOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(h.balance(passenger.id, Role::Passenger).await, dec!(-100));
    assert_eq!(h.balance(driver.id, Role::Driver).await, dec!(585));
}

#[tokio::test]
async fn cancel_releases_the_driver() {
    let h = Harness::new().await;
    let driver = h.driver_at(VehicleType::Mini, pickup(), dec!(100)).await;
    let passenger = h.passenger();

    let booking = h
        .engine
        .create_booking(passenger.clone(), VehicleType::Mini, pickup(), dropoff())
        .await
        .unwrap();

    h.engine
        .transition_booking(driver.clone(), booking.id, BookingStatus::Accepted, accept_as(&driver))
        .await
        .unwrap();

    let canceled = h
        .engine
        .transition_booking(
            passenger.clone(),
            booking.id,
            BookingStatus::Canceled,
            TransitionExtra {
                cancel_reason: Some("changed plans".to_string()),
                ..TransitionExtra::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(canceled.status, BookingStatus::Canceled);
    assert_eq!(canceled.driver_id, None);
    let cancellation = canceled.cancellation.unwrap();
    assert_eq!(cancellation.by, CanceledBy::Passenger);
    assert_eq!(cancellation.driver_id, Some(driver.id));

    let released = h.engine.find_driver(driver.clone(), driver.id).await.unwrap();
    assert!(released.available);
    assert_eq!(released.active_booking_id, None);

    assert_eq!(h.notifier.count(&driver_channel(&driver.id), events::BOOKING_CANCELED), 1);
}

#[tokio::test]
async fn only_parties_to_a_booking_may_act_on_it() {
    let h = Harness::new().await;
    let driver = h.driver_at(VehicleType::Mini, pickup(), dec!(100)).await;
    let bystander = h.driver_at(VehicleType::Sedan, pickup(), dec!(100)).await;
    let passenger = h.passenger();
    let stranger = h.passenger();

    let booking = h
        .engine
        .create_booking(passenger.clone(), VehicleType::Mini, pickup(), dropoff())
        .await
        .unwrap();

    let err = h.engine.find_booking(stranger.clone(), booking.id).await.unwrap_err();
    assert!(err.is_permission_error());

    let err = h
        .engine
        .transition_booking(passenger.clone(), booking.id, BookingStatus::Accepted, TransitionExtra::default())
        .await
        .unwrap_err();
    assert!(err.is_permission_error());

    let err = h
        .engine
        .transition_booking(bystander.clone(), booking.id, BookingStatus::Accepted, accept_as(&driver))
        .await
        .unwrap_err();
    assert!(err.is_permission_error());

    h.engine
        .transition_booking(driver.clone(), booking.id, BookingStatus::Accepted, accept_as(&driver))
        .await
        .unwrap();

    let err = h
        .engine
        .transition_booking(bystander.clone(), booking.id, BookingStatus::Ongoing, TransitionExtra::default())
        .await
        .unwrap_err();
    assert!(err.is_permission_error());

    let err = h
        .engine
        .transition_booking(passenger.clone(), booking.id, BookingStatus::Ongoing, TransitionExtra::default())
        .await
        .unwrap_err();
    assert!(err.is_permission_error());

    let err = h
        .engine
        .transition_booking(driver.clone(), booking.id, BookingStatus::Requested, TransitionExtra::default())
        .await
        .unwrap_err();
    assert!(err.is_validation_error());

    h.engine
        .transition_booking(h.staff(), booking.id, BookingStatus::Ongoing, TransitionExtra::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn staff_assignment_records_the_dispatcher() {
    let h = Harness::new().await;
    let driver = h.driver_at(VehicleType::Mini, pickup(), dec!(100)).await;
    let passenger = h.passenger();

    let booking = h
        .engine
        .create_booking(passenger.clone(), VehicleType::Mini, pickup(), dropoff())
        .await
        .unwrap();

    let err = h
        .engine
        .assign_driver(passenger.clone(), booking.id, driver.id, Default::default())
        .await
        .unwrap_err();
    assert!(err.is_permission_error());

    let staff = h.staff();
    let (booking, assignment) = h
        .engine
        .assign_driver(staff.clone(), booking.id, driver.id, ridecore::entities::Priority::High)
        .await
        .unwrap();

    assert_eq!(booking.status, BookingStatus::Accepted);
    assert_eq!(assignment.driver_id, driver.id);
    assert_eq!(assignment.dispatcher_id, Some(staff.id));
    assert_eq!(assignment.priority, ridecore::entities::Priority::High);
}

#[tokio::test]
async fn ratings_only_after_completion_and_only_once() {
    let h = Harness::new().await;
    let driver = h.driver_at(VehicleType::Mini, pickup(), dec!(100)).await;
    let passenger = h.passenger();

    let booking = h
        .engine
        .create_booking(passenger.clone(), VehicleType::Mini, pickup(), dropoff())
        .await
        .unwrap();

    let err = h
        .engine
        .rate_driver(passenger.clone(), booking.id, 5, None)
        .await
        .unwrap_err();
    assert!(err.is_conflict_error());

    for target in [BookingStatus::Accepted, BookingStatus::Ongoing, BookingStatus::Completed] {
        h.engine
            .transition_booking(driver.clone(), booking.id, target, accept_as(&driver))
            .await
            .unwrap();
    }

    let err = h
        .engine
        .rate_driver(passenger.clone(), booking.id, 6, None)
        .await
        .unwrap_err();
    assert!(err.is_validation_error());

    h.engine
        .rate_driver(passenger.clone(), booking.id, 4, Some("smooth".to_string()))
        .await
        .unwrap();
    let err = h
        .engine
        .rate_driver(passenger.clone(), booking.id, 5, None)
        .await
        .unwrap_err();
    assert!(err.is_conflict_error());

    h.engine
        .rate_passenger(driver.clone(), booking.id, 5, None)
        .await
        .unwrap();

    let rated = h.engine.find_driver(driver.clone(), driver.id).await.unwrap();
    assert_eq!(rated.rating, Some(4.0));
    assert_eq!(rated.rating_count, 1);
}

#[tokio::test]
async fn nearby_bookings_respect_radius_and_balance() {
    let h = Harness::new().await;
    h.price(VehicleType::Van, dec!(150), dec!(0)).await;

    let poor = h.driver_at(VehicleType::Van, Coordinates::new(8.0, 38.0), dec!(100)).await;
    let rich = h.driver_at(VehicleType::Van, Coordinates::new(8.0, 38.0), dec!(500)).await;

    let near = h
        .engine
        .create_booking(h.passenger(), VehicleType::Van, pickup(), dropoff())
        .await
        .unwrap();
    h.engine
        .create_booking(h.passenger(), VehicleType::Van, Coordinates::new(9.5, 39.5), dropoff())
        .await
        .unwrap();

    let query = |driver: &User| NearbyQuery {
        lat: 9.031,
        lng: 38.741,
        radius_km: Some(5.0),
        driver_id: Some(driver.id),
        ..NearbyQuery::default()
    };

    let found = h.engine.list_nearby_bookings(rich.clone(), query(&rich)).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].booking.id, near.id);

    let found = h.engine.list_nearby_bookings(poor.clone(), query(&poor)).await.unwrap();
    assert!(found.is_empty());

    let err = h
        .engine
        .list_nearby_bookings(poor.clone(), query(&rich))
        .await
        .unwrap_err();
    assert!(err.is_permission_error());

    let err = h
        .engine
        .list_nearby_bookings(h.passenger(), NearbyQuery::default())
        .await
        .unwrap_err();
    assert!(err.is_permission_error());
}
