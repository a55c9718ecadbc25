use super::helpers::{
    fetch_active_pricing, fetch_all, fetch_assignment, fetch_booking, fetch_driver, fetch_wallet,
};
use super::locks::{booking_key, driver_key};
use super::Engine;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{
    api::{BookingAPI, NearbyBooking, NearbyQuery, TransitionExtra, TripAPI},
    auth::{Platform, User},
    db::{Changeset, Table},
    entities::{
        Assignment, AssignmentStatus, Booking, BookingStatus, CanceledBy, Coordinates, Priority,
        Rating, Role, VehicleType,
    },
    error::{
        conflict_error, insufficient_balance_error, permission_error, validation_error, Error,
    },
    finance::{self, can_accept_booking, FareQuote},
    geo::{distance_km, round_km},
    notify::{booking_channel, driver_channel, events, passenger_channel},
};

const MAX_NEARBY_LIMIT: usize = 100;

pub(super) fn booking_event(booking: &Booking) -> Value {
    json!({
        "bookingId": booking.id,
        "status": booking.status.name(),
        "booking": booking,
    })
}

#[async_trait]
impl BookingAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn estimate_fare(
        &self,
        vehicle_type: VehicleType,
        pickup: Coordinates,
        dropoff: Coordinates,
    ) -> Result<FareQuote, Error> {
        let pickup = pickup.validate()?;
        let dropoff = dropoff.validate()?;

        let distance = distance_km(Some(pickup), Some(dropoff));
        let pricing = fetch_active_pricing(&*self.store, vehicle_type).await?;

        let (fare, breakdown) = finance::estimate_fare(
            &pricing,
            distance,
            0,
            None,
            Decimal::ZERO,
            self.config.minimum_fare,
        )?;

        Ok(FareQuote {
            distance_km: round_km(distance),
            fare,
            breakdown,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn create_booking(
        &self,
        user: User,
        vehicle_type: VehicleType,
        pickup: Coordinates,
        dropoff: Coordinates,
    ) -> Result<Booking, Error> {
        self.authorize(user.clone(), "create_booking", Platform)?;

        let quote = self.estimate_fare(vehicle_type, pickup, dropoff).await?;

        let mut booking = Booking::new(
            user.id,
            vehicle_type,
            pickup,
            dropoff,
            quote.distance_km,
            quote.fare,
            quote.breakdown,
        );

        match self.directory.find_passenger(user.id).await {
            Ok(Some(contact)) => {
                booking.passenger_name = contact.name;
                booking.passenger_phone = contact.phone;
            }
            Ok(None) => {}
            Err(err) => tracing::warn!(%err, "passenger lookup failed, continuing without contact"),
        }

        let mut changes = Changeset::new();
        changes.insert(Table::Bookings, booking.id, &booking)?;
        self.store.commit(changes).await?;

        tracing::info!(booking_id = %booking.id, fare = %booking.fare_estimated, "booking created");

        self.publish(
            &passenger_channel(&booking.passenger_id),
            events::BOOKING_UPDATE,
            booking_event(&booking),
        );

        if let Err(err) = self.dispatch(booking.id).await {
            tracing::warn!(%err, "initial dispatch failed, the sweeper will retry");
        }

        Ok(booking)
    }

    #[tracing::instrument(skip(self))]
    async fn find_booking(&self, user: User, id: Uuid) -> Result<Booking, Error> {
        let booking = fetch_booking(&*self.store, &id).await?;

        self.authorize(user.clone(), "read", booking.clone())?;

        Ok(booking)
    }

    #[tracing::instrument(skip(self, extra))]
    async fn transition_booking(
        &self,
        user: User,
        id: Uuid,
        target: BookingStatus,
        extra: TransitionExtra,
    ) -> Result<Booking, Error> {
        match target {
            BookingStatus::Requested => Err(validation_error("a booking cannot go back to requested")),
            BookingStatus::Accepted => {
                let driver_id = extra.driver_id.unwrap_or(user.id);
                let (booking, _) = self.bind_driver(&user, id, driver_id, None).await?;
                Ok(booking)
            }
            BookingStatus::Ongoing => self.start_trip(&user, id, extra.start_location).await,
            BookingStatus::Completed => {
                self.complete_trip(user, id, extra.end_location, extra.completion)
                    .await
            }
            BookingStatus::Canceled => self.cancel_booking(&user, id, extra.cancel_reason).await,
        }
    }

    #[tracing::instrument(skip(self))]
    async fn assign_driver(
        &self,
        user: User,
        id: Uuid,
        driver_id: Uuid,
        priority: Priority,
    ) -> Result<(Booking, Assignment), Error> {
        self.authorize(user.clone(), "assign", Platform)?;

        self.bind_driver(&user, id, driver_id, Some((user.id, priority)))
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_nearby_bookings(
        &self,
        user: User,
        query: NearbyQuery,
    ) -> Result<Vec<NearbyBooking>, Error> {
        self.authorize(user.clone(), "browse_bookings", Platform)?;

        if let Some(driver_id) = query.driver_id {
            if driver_id != user.id && !user.is_privileged() {
                return Err(permission_error());
            }
        }

        let origin = Coordinates::new(query.lat, query.lng).validate()?;

        let radius = query.radius_km.unwrap_or(self.config.dispatch_radius_km);
        if !(radius.is_finite() && radius > 0.0) {
            return Err(validation_error("radius must be a positive number of kilometres"));
        }

        let limit = query
            .limit
            .unwrap_or(self.config.nearby_limit)
            .clamp(1, MAX_NEARBY_LIMIT);

        let balance = match query.driver_id {
            Some(driver_id) => Some(fetch_wallet(&*self.store, &driver_id, Role::Driver).await?.balance),
            None => None,
        };

        let bookings: Vec<Booking> = fetch_all(&*self.store, Table::Bookings).await?;

        let mut nearby: Vec<NearbyBooking> = bookings
            .into_iter()
            .filter(|b| b.is_requested())
            .filter(|b| query.vehicle_type.map_or(true, |vt| vt == b.vehicle_type))
            .filter(|b| balance.map_or(true, |balance| can_accept_booking(balance, b.target_fare())))
            .filter_map(|b| {
                let d = distance_km(Some(origin), Some(b.pickup));
                (d <= radius).then(|| NearbyBooking {
                    distance_km: round_km(d),
                    booking: b,
                })
            })
            .collect();

        nearby.sort_by(|a, b| {
            a.distance_km
                .total_cmp(&b.distance_km)
                .then(a.booking.created_at.cmp(&b.booking.created_at))
        });
        nearby.truncate(limit);

        Ok(nearby)
    }

    #[tracing::instrument(skip(self, comment))]
    async fn rate_driver(
        &self,
        user: User,
        id: Uuid,
        score: u8,
        comment: Option<String>,
    ) -> Result<Booking, Error> {
        let rating = Rating::new(score, comment)?;

        let _booking_guard = self.locks.lock(&booking_key(&id)).await;
        let mut booking = fetch_booking(&*self.store, &id).await?;

        self.authorize(user.clone(), "rate_driver", booking.clone())?;

        booking.rate_driver(rating)?;

        let mut changes = Changeset::new();
        changes.upsert(Table::Bookings, booking.id, &booking)?;

        let _driver_guard = match booking.driver_id {
            Some(driver_id) => {
                let guard = self.locks.lock(&driver_key(&driver_id)).await;
                let mut driver = fetch_driver(&*self.store, &driver_id).await?;
                driver.add_rating(score);
                changes.upsert(Table::Drivers, driver.id, &driver)?;
                Some(guard)
            }
            None => None,
        };

        self.store.commit(changes).await?;

        Ok(booking)
    }

    #[tracing::instrument(skip(self, comment))]
    async fn rate_passenger(
        &self,
        user: User,
        id: Uuid,
        score: u8,
        comment: Option<String>,
    ) -> Result<Booking, Error> {
        let rating = Rating::new(score, comment)?;

        let _booking_guard = self.locks.lock(&booking_key(&id)).await;
        let mut booking = fetch_booking(&*self.store, &id).await?;

        self.authorize(user.clone(), "rate_passenger", booking.clone())?;

        booking.rate_passenger(rating)?;

        let mut changes = Changeset::new();
        changes.upsert(Table::Bookings, booking.id, &booking)?;
        self.store.commit(changes).await?;

        Ok(booking)
    }
}

impl Engine {
    /// requested -> accepted. The booking status and the driver's single
    /// active booking are checked and set under both locks in one commit.
    #[tracing::instrument(skip(self, user))]
    async fn bind_driver(
        &self,
        user: &User,
        id: Uuid,
        driver_id: Uuid,
        dispatcher: Option<(Uuid, Priority)>,
    ) -> Result<(Booking, Assignment), Error> {
        let _booking_guard = self.locks.lock(&booking_key(&id)).await;
        let mut booking = fetch_booking(&*self.store, &id).await?;

        booking.ensure_mutable()?;

        if dispatcher.is_none() {
            self.authorize(user.clone(), "accept", booking.clone())?;

            if driver_id != user.id && !user.is_privileged() {
                return Err(permission_error());
            }
        }

        if !booking.is_requested() {
            tracing::info!(status = %booking.status.name(), "booking already taken");
            return Err(conflict_error(format!(
                "booking {} is already {}",
                id,
                booking.status.name()
            )));
        }

        let _driver_guard = self.locks.lock(&driver_key(&driver_id)).await;
        let mut driver = fetch_driver(&*self.store, &driver_id).await?;

        driver.bind(booking.id)?;

        let wallet = fetch_wallet(&*self.store, &driver_id, Role::Driver).await?;
        let fare = booking.target_fare();

        if !can_accept_booking(wallet.balance, fare) {
            tracing::info!(balance = %wallet.balance, %fare, "package balance too low");
            return Err(insufficient_balance_error(format!(
                "package balance {} does not cover fare {}",
                wallet.balance, fare
            )));
        }

        booking.accept(driver_id, Utc::now())?;

        let (dispatcher_id, priority) = match dispatcher {
            Some((dispatcher_id, priority)) => (Some(dispatcher_id), priority),
            None => (None, Priority::default()),
        };
        let assignment = Assignment::new(booking.id, driver_id, dispatcher_id, priority);

        let mut changes = Changeset::new();
        changes
            .upsert(Table::Bookings, booking.id, &booking)?
            .upsert(Table::Drivers, driver.id, &driver)?
            .insert(Table::Assignments, booking.id, &assignment)?;
        self.store.commit(changes).await?;

        tracing::info!(%driver_id, "driver bound to booking");

        self.announce_acceptance(&booking, driver_id);

        Ok((booking, assignment))
    }

    fn announce_acceptance(&self, booking: &Booking, driver_id: Uuid) {
        let payload = json!({
            "bookingId": booking.id,
            "driverId": driver_id,
            "status": booking.status.name(),
            "acceptedAt": booking.accepted_at,
        });

        self.publish(
            &passenger_channel(&booking.passenger_id),
            events::BOOKING_ACCEPTED,
            payload.clone(),
        );
        self.publish(&booking_channel(&booking.id), events::BOOKING_UPDATE, payload);

        self.retract_offers(booking.id, Some(driver_id));
    }

    /// Tells every driver the booking was offered to that it is gone.
    pub(super) fn retract_offers(&self, booking_id: Uuid, except: Option<Uuid>) {
        for other in self.dispatch_log.offered_drivers(booking_id) {
            if Some(other) != except {
                self.publish(
                    &driver_channel(&other),
                    events::BOOKING_REMOVED,
                    json!({ "bookingId": booking_id }),
                );
            }
        }

        self.dispatch_log.forget_booking(booking_id);
    }

    #[tracing::instrument(skip(self, user))]
    async fn start_trip(
        &self,
        user: &User,
        id: Uuid,
        start_location: Option<Coordinates>,
    ) -> Result<Booking, Error> {
        let start_location = start_location.map(Coordinates::validate).transpose()?;

        let _booking_guard = self.locks.lock(&booking_key(&id)).await;
        let mut booking = fetch_booking(&*self.store, &id).await?;

        booking.ensure_mutable()?;
        self.authorize(user.clone(), "start", booking.clone())?;

        let now = Utc::now();
        booking.start(start_location, now)?;

        let driver_id = booking
            .driver_id
            .ok_or_else(|| conflict_error(format!("booking {} has no driver", id)))?;

        let trip = crate::entities::TripLog::start(&booking, driver_id, now);

        let mut changes = Changeset::new();
        changes
            .upsert(Table::Bookings, booking.id, &booking)?
            .upsert(Table::Trips, booking.id, &trip)?;
        self.store.commit(changes).await?;

        tracing::info!("trip started");

        self.start_tracking(&booking, driver_id);

        self.publish(&booking_channel(&booking.id), events::TRIP_STARTED, booking_event(&booking));
        self.publish(
            &passenger_channel(&booking.passenger_id),
            events::TRIP_STARTED,
            booking_event(&booking),
        );

        Ok(booking)
    }

    #[tracing::instrument(skip(self, user))]
    async fn cancel_booking(
        &self,
        user: &User,
        id: Uuid,
        reason: Option<String>,
    ) -> Result<Booking, Error> {
        let _booking_guard = self.locks.lock(&booking_key(&id)).await;
        let mut booking = fetch_booking(&*self.store, &id).await?;

        booking.ensure_mutable()?;
        self.authorize(user.clone(), "cancel", booking.clone())?;

        let by = if booking.is_driver(&user.id) {
            CanceledBy::Driver
        } else if booking.is_passenger(&user.id) {
            CanceledBy::Passenger
        } else {
            CanceledBy::System
        };

        let freed_driver = booking.cancel(by, reason.clone(), Utc::now())?;

        let mut changes = Changeset::new();
        changes.upsert(Table::Bookings, booking.id, &booking)?;

        let _driver_guard = match freed_driver {
            Some(driver_id) => {
                let guard = self.locks.lock(&driver_key(&driver_id)).await;

                let mut driver = fetch_driver(&*self.store, &driver_id).await?;
                driver.release(booking.id);
                changes.upsert(Table::Drivers, driver.id, &driver)?;

                if let Some(mut assignment) = fetch_assignment(&*self.store, &booking.id).await? {
                    assignment.close(AssignmentStatus::Canceled);
                    changes.upsert(Table::Assignments, booking.id, &assignment)?;
                }

                Some(guard)
            }
            None => None,
        };

        self.store.commit(changes).await?;

        tracing::info!(?by, "booking canceled");

        self.tracker.stop(booking.id);
        self.retract_offers(booking.id, freed_driver);

        let payload = json!({
            "bookingId": booking.id,
            "status": booking.status.name(),
            "canceledBy": by,
            "reason": reason,
        });

        self.publish(
            &passenger_channel(&booking.passenger_id),
            events::BOOKING_CANCELED,
            payload.clone(),
        );
        if let Some(driver_id) = freed_driver {
            self.publish(&driver_channel(&driver_id), events::BOOKING_CANCELED, payload.clone());
        }
        self.publish(&booking_channel(&booking.id), events::BOOKING_CANCELED, payload);

        Ok(booking)
    }
}
