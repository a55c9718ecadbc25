use super::helpers::{fetch_all, fetch_booking, fetch_wallet};
use super::Engine;

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use crate::{
    api::{DispatchAPI, DispatchOutcome},
    auth::{Platform, User},
    db::Table,
    entities::{Booking, Driver, Role},
    error::Error,
    finance::can_accept_booking,
    geo::{distance_km, round_km},
    notify::{driver_channel, events},
};

/// Drivers that could take the booking right now, nearest first. Ties on
/// distance fall back to driver id so the order is stable.
pub fn rank_candidates(booking: &Booking, drivers: Vec<Driver>, radius_km: f64) -> Vec<(Driver, f64)> {
    let mut candidates: Vec<(Driver, f64)> = drivers
        .into_iter()
        .filter(|driver| driver.can_be_bound())
        .filter(|driver| driver.vehicle_type == booking.vehicle_type)
        .filter_map(|driver| {
            let distance = distance_km(
                driver.last_known_location.as_ref().map(|l| l.coordinates()),
                Some(booking.pickup),
            );

            (distance <= radius_km).then(|| (driver, distance))
        })
        .collect();

    candidates.sort_by(|(a, da), (b, db)| da.total_cmp(db).then(a.id.cmp(&b.id)));
    candidates
}

#[async_trait]
impl DispatchAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn dispatch_booking(&self, user: User, id: Uuid) -> Result<DispatchOutcome, Error> {
        self.authorize(user, "dispatch", Platform)?;

        self.dispatch(id).await
    }

    #[tracing::instrument(skip(self))]
    async fn dispatch_pending(&self, user: User) -> Result<usize, Error> {
        self.authorize(user, "dispatch", Platform)?;

        self.sweep().await
    }
}

impl Engine {
    /// Offers a requested booking to the nearest driver who can afford it.
    #[tracing::instrument(skip(self))]
    pub(super) async fn dispatch(&self, id: Uuid) -> Result<DispatchOutcome, Error> {
        let booking = fetch_booking(&*self.store, &id).await?;

        if !booking.is_requested() {
            return Ok(DispatchOutcome::NotRequested);
        }

        let drivers: Vec<Driver> = fetch_all(&*self.store, Table::Drivers).await?;
        let fare = booking.target_fare();

        for (driver, distance) in rank_candidates(&booking, drivers, self.config.dispatch_radius_km) {
            let wallet = fetch_wallet(&*self.store, &driver.id, Role::Driver).await?;

            if !can_accept_booking(wallet.balance, fare) {
                tracing::debug!(driver_id = %driver.id, balance = %wallet.balance, %fare, "skipping driver");
                continue;
            }

            if !self.dispatch_log.try_mark(booking.id, driver.id) {
                return Ok(DispatchOutcome::AlreadyOffered { driver_id: driver.id });
            }

            let distance_km = round_km(distance);

            self.publish(
                &driver_channel(&driver.id),
                events::BOOKING_NEW,
                json!({
                    "bookingId": booking.id,
                    "distanceKm": distance_km,
                    "booking": booking,
                }),
            );

            tracing::info!(driver_id = %driver.id, distance_km, "booking offered");

            return Ok(DispatchOutcome::Offered {
                driver_id: driver.id,
                distance_km,
            });
        }

        tracing::info!("no eligible driver");

        Ok(DispatchOutcome::NoEligibleDriver)
    }

    /// One pass over every requested booking, oldest first. Returns how many
    /// offers went out.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<usize, Error> {
        let purged = self.dispatch_log.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "expired dispatch offers");
        }

        let mut pending: Vec<Booking> = fetch_all(&*self.store, Table::Bookings).await?;
        pending.retain(|booking| booking.is_requested());
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut offered = 0;

        for booking in pending {
            match self.dispatch(booking.id).await {
                Ok(DispatchOutcome::Offered { .. }) => offered += 1,
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, booking_id = %booking.id, "dispatch failed"),
            }
        }

        Ok(offered)
    }
}
