use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::{
    db::{Store, Table},
    entities::{
        latest_commission, Assignment, Booking, Commission, Driver, Role, Transaction, TripLog,
        VehicleType, Wallet,
    },
    error::{not_found_error, Error},
    finance::PricingRecord,
};

#[tracing::instrument(skip(store))]
pub async fn fetch<T: DeserializeOwned>(
    store: &dyn Store,
    table: Table,
    key: &str,
) -> Result<Option<T>, Error> {
    match store.fetch(table, key).await? {
        Some(data) => Ok(Some(serde_json::from_value(data)?)),
        None => Ok(None),
    }
}

pub async fn fetch_all<T: DeserializeOwned>(store: &dyn Store, table: Table) -> Result<Vec<T>, Error> {
    store
        .fetch_all(table)
        .await?
        .into_iter()
        .map(|data| serde_json::from_value(data).map_err(Error::from))
        .collect()
}

pub async fn find_by<T: DeserializeOwned>(
    store: &dyn Store,
    table: Table,
    field: &str,
    value: &str,
) -> Result<Vec<T>, Error> {
    store
        .find_by(table, field, value)
        .await?
        .into_iter()
        .map(|data| serde_json::from_value(data).map_err(Error::from))
        .collect()
}

pub async fn fetch_booking(store: &dyn Store, id: &Uuid) -> Result<Booking, Error> {
    fetch(store, Table::Bookings, &id.to_string())
        .await?
        .ok_or_else(|| not_found_error(format!("booking {}", id)))
}

pub async fn fetch_driver(store: &dyn Store, id: &Uuid) -> Result<Driver, Error> {
    fetch(store, Table::Drivers, &id.to_string())
        .await?
        .ok_or_else(|| not_found_error(format!("driver {}", id)))
}

/// A wallet nobody has touched yet is an empty one.
pub async fn fetch_wallet(store: &dyn Store, user_id: &Uuid, role: Role) -> Result<Wallet, Error> {
    Ok(fetch(store, Table::Wallets, &Wallet::key_for(user_id, role))
        .await?
        .unwrap_or_else(|| Wallet::new(*user_id, role)))
}

pub async fn fetch_transaction(store: &dyn Store, id: &Uuid) -> Result<Option<Transaction>, Error> {
    fetch(store, Table::Transactions, &id.to_string()).await
}

pub async fn fetch_assignment(store: &dyn Store, booking_id: &Uuid) -> Result<Option<Assignment>, Error> {
    fetch(store, Table::Assignments, &booking_id.to_string()).await
}

pub async fn fetch_trip_log(store: &dyn Store, booking_id: &Uuid) -> Result<Option<TripLog>, Error> {
    fetch(store, Table::Trips, &booking_id.to_string()).await
}

/// Active pricing is required, there is no silent default.
pub async fn fetch_active_pricing(
    store: &dyn Store,
    vehicle_type: VehicleType,
) -> Result<PricingRecord, Error> {
    fetch::<PricingRecord>(store, Table::Pricing, vehicle_type.name())
        .await?
        .filter(|pricing| pricing.is_active)
        .ok_or_else(|| not_found_error(format!("active pricing for {}", vehicle_type)))
}

pub async fn resolve_commission_rate(
    store: &dyn Store,
    driver_id: &Uuid,
    default_rate: Decimal,
) -> Result<Decimal, Error> {
    let records: Vec<Commission> =
        find_by(store, Table::Commissions, "driver_id", &driver_id.to_string()).await?;

    Ok(latest_commission(records)
        .map(|commission| commission.percentage)
        .unwrap_or(default_rate))
}
