mod booking_api;
mod dedup;
mod dispatch_api;
mod driver_api;
mod finance_api;
mod helpers;
mod locks;
mod tracker;
mod trip_api;
mod wallet_api;

pub use dedup::DispatchLog;
pub use dispatch_api::rank_candidates;
pub use locks::KeyedLocks;
pub use tracker::{Tick, TripTracker};

use oso::Oso;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{
    api::API,
    auth::authorizor,
    config::Config,
    db::Store,
    entities::Role,
    error::{permission_error, Error},
    external::{
        Directory, HttpDirectory, HttpPaymentProvider, NullDirectory, PaymentProvider,
        UnconfiguredPaymentProvider,
    },
    notify::{driver_channel, passenger_channel, LogNotifier, Notifier, ADMIN_CHANNEL},
};

pub struct Engine {
    store: Arc<dyn Store>,
    authorizor: Oso,
    config: Config,
    notifier: Arc<dyn Notifier>,
    payments: Arc<dyn PaymentProvider>,
    directory: Arc<dyn Directory>,
    locks: KeyedLocks,
    dispatch_log: DispatchLog,
    tracker: TripTracker,
}

impl Engine {
    #[tracing::instrument(name = "Engine::new", skip_all)]
    pub fn new(config: Config, store: Arc<dyn Store>) -> Result<Self, Error> {
        let payments: Arc<dyn PaymentProvider> = match &config.payment_gateway_url {
            Some(url) => Arc::new(HttpPaymentProvider::new(
                url.clone(),
                config.payment_merchant_id.clone(),
                config.payment_timeout,
            )?),
            None => {
                tracing::warn!("no payment gateway configured, top ups and withdrawals will fail");
                Arc::new(UnconfiguredPaymentProvider)
            }
        };

        let directory: Arc<dyn Directory> = match &config.user_service_url {
            Some(url) => Arc::new(HttpDirectory::new(url.clone())),
            None => Arc::new(NullDirectory),
        };

        Ok(Self {
            store,
            authorizor: authorizor::new()?,
            notifier: Arc::new(LogNotifier),
            payments,
            directory,
            locks: KeyedLocks::new(),
            dispatch_log: DispatchLog::new(config.dispatch_ttl),
            tracker: TripTracker::new(config.tracking_interval),
            config,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_payment_provider(mut self, payments: Arc<dyn PaymentProvider>) -> Self {
        self.payments = payments;
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracker(&self) -> &TripTracker {
        &self.tracker
    }

    pub fn dispatch_log(&self) -> &DispatchLog {
        &self.dispatch_log
    }

    pub fn shutdown(&self) {
        self.tracker.stop_all();
    }

    fn publish(&self, channel: &str, event: &str, payload: Value) {
        self.notifier.notify(channel, event, payload);
    }

    fn wallet_channel(&self, user_id: &Uuid, role: Role) -> String {
        match role {
            Role::Driver => driver_channel(user_id),
            Role::Passenger => passenger_channel(user_id),
            Role::Admin => ADMIN_CHANNEL.to_string(),
        }
    }
}

impl Engine {
    pub fn authorize<Actor, Action, Resource>(
        &self,
        actor: Actor,
        action: Action,
        resource: Resource,
    ) -> Result<(), Error>
    where
        Actor: oso::ToPolar,
        Action: oso::ToPolar,
        Resource: oso::ToPolar,
    {
        if self.authorizor.is_allowed(actor, action, resource)? {
            return Ok(());
        }

        Err(permission_error())
    }
}

impl API for Engine {}

/// Periodic dispatch pass over bookings nobody has taken yet.
pub fn spawn_dispatch_sweeper(engine: Arc<Engine>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(engine.config.dispatch_sweep_interval);

        loop {
            interval.tick().await;

            match engine.sweep().await {
                Ok(offered) if offered > 0 => tracing::info!(offered, "dispatch sweep"),
                Ok(_) => {}
                Err(err) => tracing::error!(%err, "dispatch sweep failed"),
            }
        }
    })
}

#[test]
fn new_engine() {
    use crate::db::MemoryStore;
    use tokio_test::block_on;

    let engine = Engine::new(Config::default(), Arc::new(MemoryStore::new())).unwrap();

    assert_eq!(block_on(engine.sweep()).unwrap(), 0);
}
