use super::helpers::{fetch, fetch_driver};
use super::locks::driver_key;
use super::Engine;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::{
    api::DriverAPI,
    auth::{Platform, User},
    db::{Changeset, Table},
    entities::{Driver, Location, VehicleType},
    error::{conflict_error, permission_error, Error},
};

#[async_trait]
impl DriverAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn register_driver(&self, user: User, vehicle_type: VehicleType) -> Result<Driver, Error> {
        self.authorize(user.clone(), "register_driver", Platform)?;

        let _guard = self.locks.lock(&driver_key(&user.id)).await;

        if fetch::<Driver>(&*self.store, Table::Drivers, &user.id.to_string())
            .await?
            .is_some()
        {
            return Err(conflict_error(format!("driver {} already registered", user.id)));
        }

        let driver = Driver::new(user.id, vehicle_type);

        let mut changes = Changeset::new();
        changes.insert(Table::Drivers, driver.id, &driver)?;
        self.store.commit(changes).await?;

        tracing::info!(%vehicle_type, "driver registered");

        Ok(driver)
    }

    #[tracing::instrument(skip(self))]
    async fn find_driver(&self, user: User, id: Uuid) -> Result<Driver, Error> {
        if user.id != id && !user.is_privileged() {
            return Err(permission_error());
        }

        fetch_driver(&*self.store, &id).await
    }

    #[tracing::instrument(skip(self))]
    async fn update_driver_location(&self, user: User, location: Location) -> Result<Driver, Error> {
        self.authorize(user.clone(), "report_location", Platform)?;

        location.coordinates().validate()?;

        let _guard = self.locks.lock(&driver_key(&user.id)).await;
        let mut driver = fetch_driver(&*self.store, &user.id).await?;

        driver.report_location(location, Utc::now());

        let mut changes = Changeset::new();
        changes.upsert(Table::Drivers, driver.id, &driver)?;
        self.store.commit(changes).await?;

        Ok(driver)
    }

    #[tracing::instrument(skip(self))]
    async fn set_driver_availability(&self, user: User, available: bool) -> Result<Driver, Error> {
        self.authorize(user.clone(), "update_status", Platform)?;

        let driver = {
            let _guard = self.locks.lock(&driver_key(&user.id)).await;
            let mut driver = fetch_driver(&*self.store, &user.id).await?;

            driver.set_available(available)?;

            let mut changes = Changeset::new();
            changes.upsert(Table::Drivers, driver.id, &driver)?;
            self.store.commit(changes).await?;

            driver
        };

        tracing::info!(available, "driver availability changed");

        if available {
            if let Err(err) = self.sweep().await {
                tracing::warn!(%err, "dispatch after availability change failed");
            }
        }

        Ok(driver)
    }
}
