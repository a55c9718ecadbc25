use super::booking_api::booking_event;
use super::helpers::{
    fetch_active_pricing, fetch_assignment, fetch_booking, fetch_driver, fetch_trip_log,
    fetch_wallet, resolve_commission_rate,
};
use super::locks::{booking_key, driver_key, wallet_key};
use super::{Engine, Tick};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    api::{CompletionOptions, TripAPI},
    auth::User,
    db::{Changeset, Table},
    entities::{
        earnings_rows, AssignmentStatus, Booking, BookingStatus, Coordinates, Role, Transaction,
        TransactionKind, TripLog, Wallet,
    },
    error::{conflict_error, validation_error, Error},
    finance::{settle, trip_distance_km, waiting_minutes, Settlement, SettlementInput},
    geo::round_km,
    notify::{booking_channel, driver_channel, events, passenger_channel, ADMIN_CHANNEL},
};

#[async_trait]
impl TripAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn record_trip_waypoint(&self, user: User, id: Uuid, point: Coordinates) -> Result<(), Error> {
        let point = point.validate()?;

        let _booking_guard = self.locks.lock(&booking_key(&id)).await;
        let booking = fetch_booking(&*self.store, &id).await?;

        self.authorize(user.clone(), "record_waypoint", booking.clone())?;

        if booking.status != BookingStatus::Ongoing {
            return Err(conflict_error(format!(
                "booking {} is {}, waypoints are only recorded on ongoing trips",
                id,
                booking.status.name()
            )));
        }

        let now = Utc::now();
        let mut trip = match fetch_trip_log(&*self.store, &id).await? {
            Some(trip) => trip,
            None => {
                let driver_id = booking
                    .driver_id
                    .ok_or_else(|| conflict_error(format!("booking {} has no driver", id)))?;
                TripLog::start(&booking, driver_id, booking.started_at.unwrap_or(now))
            }
        };

        trip.record(point, now);

        let mut changes = Changeset::new();
        changes.upsert(Table::Trips, id, &trip)?;
        self.store.commit(changes).await?;

        Ok(())
    }

    /// ongoing -> completed, with the whole money movement in one commit.
    #[tracing::instrument(skip(self, options))]
    async fn complete_trip(
        &self,
        user: User,
        id: Uuid,
        end_location: Option<Coordinates>,
        options: CompletionOptions,
    ) -> Result<Booking, Error> {
        let end_location = end_location.map(Coordinates::validate).transpose()?;

        let discount = options.discount.unwrap_or(Decimal::ZERO);
        if discount.is_sign_negative() {
            return Err(validation_error("discount cannot be negative"));
        }

        let _booking_guard = self.locks.lock(&booking_key(&id)).await;
        let mut booking = fetch_booking(&*self.store, &id).await?;

        booking.ensure_mutable()?;
        self.authorize(user.clone(), "complete", booking.clone())?;

        if booking.status != BookingStatus::Ongoing {
            return Err(conflict_error(format!(
                "booking {} is {}, expected ongoing",
                id,
                booking.status.name()
            )));
        }

        let driver_id = booking
            .driver_id
            .ok_or_else(|| conflict_error(format!("booking {} has no driver", id)))?;

        let _driver_guard = self.locks.lock(&driver_key(&driver_id)).await;
        let mut driver = fetch_driver(&*self.store, &driver_id).await?;

        let now = Utc::now();

        let mut trip = match fetch_trip_log(&*self.store, &id).await? {
            Some(trip) => trip,
            None => TripLog::start(&booking, driver_id, booking.started_at.unwrap_or(now)),
        };

        let distance = trip_distance_km(
            &trip.path(),
            booking.start_location,
            end_location,
            booking.pickup,
            booking.dropoff,
        );

        let pricing = fetch_active_pricing(&*self.store, booking.vehicle_type).await?;
        let commission_rate =
            resolve_commission_rate(&*self.store, &driver_id, self.config.default_commission_rate)
                .await?;

        let settlement = settle(SettlementInput {
            pricing: &pricing,
            distance_km: distance,
            waiting_minutes: waiting_minutes(booking.started_at, now),
            surge_multiplier: options.surge_multiplier,
            discount,
            minimum_fare: self.config.minimum_fare,
            commission_rate,
        })?;

        booking.complete(&settlement, end_location, now)?;
        driver.release(booking.id);
        trip.summarize(&settlement, now);

        let mut changes = Changeset::new();
        changes
            .upsert(Table::Bookings, booking.id, &booking)?
            .upsert(Table::Drivers, driver.id, &driver)?
            .upsert(Table::Trips, booking.id, &trip)?;

        if let Some(mut assignment) = fetch_assignment(&*self.store, &booking.id).await? {
            assignment.close(AssignmentStatus::Completed);
            changes.upsert(Table::Assignments, booking.id, &assignment)?;
        }

        let (driver_row, admin_row) = earnings_rows(&booking, driver_id, &settlement, now);
        changes
            .insert(Table::DriverEarnings, booking.id, &driver_row)?
            .insert(Table::AdminEarnings, booking.id, &admin_row)?;

        let wallets = self
            .settle_wallets(&mut changes, &booking, driver_id, &settlement, options.debit_passenger_wallet)
            .await?;

        self.store.commit(changes).await?;

        // wallet locks are released with `wallets`
        let touched: Vec<(Uuid, Role)> = wallets.iter().map(|w| (w.user_id, w.role)).collect();
        drop(wallets);

        tracing::info!(
            fare = %settlement.fare,
            commission = %settlement.commission,
            driver_earnings = %settlement.driver_earnings,
            "trip completed"
        );

        self.tracker.stop(booking.id);
        self.dispatch_log.forget_booking(booking.id);

        self.announce_completion(&booking, driver_id, &settlement);
        for (user_id, role) in touched {
            self.publish(
                &self.wallet_channel(&user_id, role),
                events::WALLET_UPDATE,
                json!({ "userId": user_id, "role": role, "bookingId": booking.id }),
            );
        }

        Ok(booking)
    }
}

/// Wallets settled by a completion together with the locks that guard them.
struct SettledWallets {
    wallets: Vec<Wallet>,
    _guards: Vec<tokio::sync::OwnedMutexGuard<()>>,
}

impl SettledWallets {
    fn iter(&self) -> impl Iterator<Item = &Wallet> {
        self.wallets.iter()
    }
}

impl Engine {
    /// Driver gets net earnings, the platform gets commission, and the
    /// passenger optionally pays the fare. Zero amounts leave no ledger entry.
    async fn settle_wallets(
        &self,
        changes: &mut Changeset,
        booking: &Booking,
        driver_id: Uuid,
        settlement: &Settlement,
        debit_passenger: bool,
    ) -> Result<SettledWallets, Error> {
        let platform_id = self.config.platform_account_id;

        let mut moves = vec![
            (driver_id, Role::Driver, TransactionKind::Credit, settlement.driver_earnings),
            (platform_id, Role::Admin, TransactionKind::Credit, settlement.commission),
        ];
        if debit_passenger {
            moves.push((booking.passenger_id, Role::Passenger, TransactionKind::Debit, settlement.fare));
        }

        let keys: Vec<String> = moves
            .iter()
            .map(|(user_id, role, _, _)| wallet_key(&Wallet::key_for(user_id, *role)))
            .collect();
        let guards = self.locks.lock_all(&keys).await;

        let reason = format!("booking {}", booking.id);
        let mut wallets = Vec::with_capacity(moves.len());

        for (user_id, role, kind, amount) in moves {
            let mut wallet = fetch_wallet(&*self.store, &user_id, role).await?;

            if amount > Decimal::ZERO {
                let mut tx = Transaction::internal(user_id, role, amount, kind, reason.clone());
                tx.ref_id = Some(booking.id.to_string());

                wallet.apply(&tx)?;
                changes.insert(Table::Transactions, tx.id, &tx)?;
            }

            if role == Role::Driver {
                wallet.record_earnings(settlement.driver_earnings);
            } else if role == Role::Admin {
                wallet.record_earnings(settlement.commission);
            }

            changes.upsert(Table::Wallets, wallet.key(), &wallet)?;
            wallets.push(wallet);
        }

        Ok(SettledWallets {
            wallets,
            _guards: guards,
        })
    }

    fn announce_completion(&self, booking: &Booking, driver_id: Uuid, settlement: &Settlement) {
        let payload = json!({
            "bookingId": booking.id,
            "amount": settlement.fare,
            "distance": round_km(settlement.distance_km),
            "waitingTime": settlement.waiting_minutes,
            "completedAt": booking.completed_at,
            "driverEarnings": settlement.driver_earnings,
            "commission": settlement.commission,
        });

        self.publish(&booking_channel(&booking.id), events::TRIP_COMPLETED, payload.clone());
        self.publish(
            &passenger_channel(&booking.passenger_id),
            events::TRIP_COMPLETED,
            payload.clone(),
        );
        self.publish(&driver_channel(&driver_id), events::TRIP_COMPLETED, payload.clone());
        self.publish(ADMIN_CHANNEL, events::TRIP_COMPLETED, payload);
        self.publish(
            &booking_channel(&booking.id),
            events::BOOKING_UPDATE,
            booking_event(booking),
        );
    }

    /// Periodic `position:update` on the booking channel while the trip runs.
    pub(super) fn start_tracking(&self, booking: &Booking, driver_id: Uuid) -> bool {
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        let booking_id = booking.id;

        let tick: Tick = Arc::new(move || {
            let store = store.clone();
            let notifier = notifier.clone();

            async move {
                match fetch_driver(&*store, &driver_id).await {
                    Ok(driver) => {
                        if let Some(location) = driver.last_known_location {
                            notifier.notify(
                                &booking_channel(&booking_id),
                                events::POSITION_UPDATE,
                                json!({
                                    "bookingId": booking_id,
                                    "driverId": driver_id,
                                    "location": location,
                                    "at": driver.location_updated_at,
                                }),
                            );
                        }
                    }
                    Err(err) => tracing::warn!(%err, %booking_id, "position update failed"),
                }
            }
            .boxed()
        });

        self.tracker.start(booking_id, tick)
    }
}
