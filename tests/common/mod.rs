#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use ridecore::api::{DriverAPI, FinanceAPI, PayoutDestination, WalletAPI};
use ridecore::auth::User;
use ridecore::config::Config;
use ridecore::db::{MemoryStore, Store, Table};
use ridecore::engine::Engine;
use ridecore::entities::{Coordinates, Location, Role, VehicleType};
use ridecore::error::{external_provider_error, Error};
use ridecore::external::{GatewayReceipt, PaymentProvider, PaymentRequest};
use ridecore::finance::PricingRecord;
use ridecore::notify::RecordingNotifier;

pub const PLATFORM_ID: Uuid = Uuid::from_u128(0x0a11);

pub fn pickup() -> Coordinates {
    Coordinates::new(9.03, 38.74)
}

pub fn dropoff() -> Coordinates {
    Coordinates::new(9.05, 38.76)
}

pub fn wallet_destination() -> PayoutDestination {
    PayoutDestination {
        phone: "0911223344".to_string(),
        payment_method: "telebirr".to_string(),
    }
}

/// Gateway double that records every request and can be switched to fail.
#[derive(Default)]
pub struct StubGateway {
    failing: AtomicBool,
    requests: Mutex<Vec<PaymentRequest>>,
}

impl StubGateway {
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<PaymentRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn answer(&self, request: PaymentRequest) -> Result<GatewayReceipt, Error> {
        let id = request.id.clone();
        self.requests.lock().unwrap().push(request);

        if self.failing.load(Ordering::SeqCst) {
            return Err(external_provider_error("gateway down"));
        }

        Ok(GatewayReceipt::from_response(json!({
            "TxnId": format!("GW-{}", id),
            "status": "PENDING",
        })))
    }
}

#[async_trait]
impl PaymentProvider for StubGateway {
    async fn initiate_deposit(&self, request: PaymentRequest) -> Result<GatewayReceipt, Error> {
        self.answer(request)
    }

    async fn initiate_payout(&self, request: PaymentRequest) -> Result<GatewayReceipt, Error> {
        self.answer(request)
    }
}

pub fn test_config() -> Config {
    Config {
        tracking_interval: Duration::from_millis(20),
        platform_account_id: PLATFORM_ID,
        ..Config::default()
    }
}

pub struct Harness {
    pub engine: Arc<Engine>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub gateway: Arc<StubGateway>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let gateway = Arc::new(StubGateway::default());

        let engine = Engine::new(config, store.clone())
            .unwrap()
            .with_notifier(notifier.clone())
            .with_payment_provider(gateway.clone());

        let harness = Self {
            engine: Arc::new(engine),
            store,
            notifier,
            gateway,
        };

        for vehicle_type in [VehicleType::Mini, VehicleType::Sedan, VehicleType::Van] {
            harness.price(vehicle_type, dec!(2), dec!(1)).await;
        }

        harness
    }

    pub fn admin(&self) -> User {
        User::admin(Uuid::from_u128(0xad))
    }

    pub fn staff(&self) -> User {
        User::staff(Uuid::from_u128(0x57))
    }

    pub fn passenger(&self) -> User {
        User::passenger(Uuid::new_v4())
    }

    pub async fn price(&self, vehicle_type: VehicleType, base_fare: Decimal, per_km: Decimal) {
        let pricing = PricingRecord {
            base_fare,
            per_km,
            ..PricingRecord::new(vehicle_type)
        };

        self.engine.set_pricing(self.admin(), pricing).await.unwrap();
    }

    /// Registered, located, funded and available.
    pub async fn driver_at(
        &self,
        vehicle_type: VehicleType,
        at: Coordinates,
        balance: Decimal,
    ) -> User {
        let user = User::driver(Uuid::new_v4());

        self.engine
            .register_driver(user.clone(), vehicle_type)
            .await
            .unwrap();

        self.engine
            .update_driver_location(
                user.clone(),
                Location {
                    lat: at.lat,
                    lng: at.lng,
                    bearing: None,
                },
            )
            .await
            .unwrap();

        if balance > Decimal::ZERO {
            self.engine
                .credit(self.admin(), user.id, Role::Driver, balance, "seed".to_string())
                .await
                .unwrap();
        }

        self.engine
            .set_driver_availability(user.clone(), true)
            .await
            .unwrap();

        user
    }

    pub async fn balance(&self, user_id: Uuid, role: Role) -> Decimal {
        self.engine
            .find_wallet(self.admin(), user_id, role)
            .await
            .unwrap()
            .balance
    }

    pub async fn rows(&self, table: Table) -> usize {
        self.store.fetch_all(table).await.unwrap().len()
    }
}
