use super::helpers::{fetch_active_pricing, resolve_commission_rate};
use super::Engine;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    api::FinanceAPI,
    auth::{Platform, User},
    db::{Changeset, Table},
    entities::{Commission, VehicleType},
    error::Error,
    finance::PricingRecord,
};

#[async_trait]
impl FinanceAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn set_pricing(&self, user: User, pricing: PricingRecord) -> Result<PricingRecord, Error> {
        self.authorize(user.clone(), "manage_pricing", Platform)?;

        let mut pricing = pricing.validate()?;
        pricing.updated_at = Utc::now();

        let mut changes = Changeset::new();
        changes.upsert(Table::Pricing, pricing.vehicle_type.name(), &pricing)?;
        self.store.commit(changes).await?;

        tracing::info!(vehicle_type = %pricing.vehicle_type, "pricing updated");

        Ok(pricing)
    }

    #[tracing::instrument(skip(self))]
    async fn find_pricing(&self, vehicle_type: VehicleType) -> Result<PricingRecord, Error> {
        fetch_active_pricing(&*self.store, vehicle_type).await
    }

    #[tracing::instrument(skip(self))]
    async fn set_commission(
        &self,
        user: User,
        driver_id: Uuid,
        percentage: Decimal,
        description: Option<String>,
    ) -> Result<Commission, Error> {
        self.authorize(user.clone(), "manage_commission", Platform)?;

        let commission = Commission::new(driver_id, percentage, description, user.id)?;

        let mut changes = Changeset::new();
        changes.insert(Table::Commissions, commission.id, &commission)?;
        self.store.commit(changes).await?;

        tracing::info!(%driver_id, %percentage, "commission set");

        Ok(commission)
    }

    #[tracing::instrument(skip(self))]
    async fn commission_rate(&self, driver_id: Uuid) -> Result<Decimal, Error> {
        resolve_commission_rate(&*self.store, &driver_id, self.config.default_commission_rate).await
    }
}
