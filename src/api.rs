use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::User;
use crate::entities::{
    Assignment, Booking, BookingStatus, Commission, Coordinates, Driver, Location, Priority, Role,
    Transaction, TransactionStatus, VehicleType, Wallet,
};
use crate::error::Error;
use crate::finance::{FareQuote, PricingRecord};

/// Optional inputs carried by a booking transition.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransitionExtra {
    /// Driver to bind on `accepted`, defaults to the acting user.
    pub driver_id: Option<Uuid>,
    pub start_location: Option<Coordinates>,
    pub end_location: Option<Coordinates>,
    pub cancel_reason: Option<String>,
    pub completion: CompletionOptions,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub surge_multiplier: Option<Decimal>,
    pub discount: Option<Decimal>,
    pub debit_passenger_wallet: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_km: Option<f64>,
    pub vehicle_type: Option<VehicleType>,
    /// Only bookings this driver can afford.
    pub driver_id: Option<Uuid>,
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NearbyBooking {
    pub booking: Booking,
    pub distance_km: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Offered { driver_id: Uuid, distance_km: f64 },
    AlreadyOffered { driver_id: Uuid },
    NoEligibleDriver,
    NotRequested,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayoutDestination {
    pub phone: String,
    pub payment_method: String,
}

/// Acknowledgement handed back to the payment gateway.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackOutcome {
    pub matched: bool,
    pub applied: bool,
    pub transaction_id: Option<Uuid>,
    pub status: Option<TransactionStatus>,
}

#[async_trait]
pub trait BookingAPI {
    async fn estimate_fare(
        &self,
        vehicle_type: VehicleType,
        pickup: Coordinates,
        dropoff: Coordinates,
    ) -> Result<FareQuote, Error>;

    async fn create_booking(
        &self,
        user: User,
        vehicle_type: VehicleType,
        pickup: Coordinates,
        dropoff: Coordinates,
    ) -> Result<Booking, Error>;

    async fn find_booking(&self, user: User, id: Uuid) -> Result<Booking, Error>;

    async fn transition_booking(
        &self,
        user: User,
        id: Uuid,
        target: BookingStatus,
        extra: TransitionExtra,
    ) -> Result<Booking, Error>;

    async fn assign_driver(
        &self,
        user: User,
        id: Uuid,
        driver_id: Uuid,
        priority: Priority,
    ) -> Result<(Booking, Assignment), Error>;

    async fn list_nearby_bookings(
        &self,
        user: User,
        query: NearbyQuery,
    ) -> Result<Vec<NearbyBooking>, Error>;

    async fn rate_driver(
        &self,
        user: User,
        id: Uuid,
        score: u8,
        comment: Option<String>,
    ) -> Result<Booking, Error>;

    async fn rate_passenger(
        &self,
        user: User,
        id: Uuid,
        score: u8,
        comment: Option<String>,
    ) -> Result<Booking, Error>;
}

#[async_trait]
pub trait TripAPI {
    async fn record_trip_waypoint(&self, user: User, id: Uuid, point: Coordinates) -> Result<(), Error>;

    async fn complete_trip(
        &self,
        user: User,
        id: Uuid,
        end_location: Option<Coordinates>,
        options: CompletionOptions,
    ) -> Result<Booking, Error>;
}

#[async_trait]
pub trait DispatchAPI {
    async fn dispatch_booking(&self, user: User, id: Uuid) -> Result<DispatchOutcome, Error>;

    /// Re-dispatches every booking still waiting for a driver.
    async fn dispatch_pending(&self, user: User) -> Result<usize, Error>;
}

#[async_trait]
pub trait DriverAPI {
    async fn register_driver(&self, user: User, vehicle_type: VehicleType) -> Result<Driver, Error>;

    async fn find_driver(&self, user: User, id: Uuid) -> Result<Driver, Error>;

    async fn update_driver_location(&self, user: User, location: Location) -> Result<Driver, Error>;

    async fn set_driver_availability(&self, user: User, available: bool) -> Result<Driver, Error>;
}

#[async_trait]
pub trait FinanceAPI {
    async fn set_pricing(&self, user: User, pricing: PricingRecord) -> Result<PricingRecord, Error>;

    async fn find_pricing(&self, vehicle_type: VehicleType) -> Result<PricingRecord, Error>;

    async fn set_commission(
        &self,
        user: User,
        driver_id: Uuid,
        percentage: Decimal,
        description: Option<String>,
    ) -> Result<Commission, Error>;

    async fn commission_rate(&self, driver_id: Uuid) -> Result<Decimal, Error>;
}

#[async_trait]
pub trait WalletAPI {
    async fn find_wallet(&self, user: User, user_id: Uuid, role: Role) -> Result<Wallet, Error>;

    async fn list_transactions(
        &self,
        user: User,
        user_id: Uuid,
        role: Role,
    ) -> Result<Vec<Transaction>, Error>;

    async fn credit(
        &self,
        user: User,
        user_id: Uuid,
        role: Role,
        amount: Decimal,
        reason: String,
    ) -> Result<Transaction, Error>;

    async fn debit(
        &self,
        user: User,
        user_id: Uuid,
        role: Role,
        amount: Decimal,
        reason: String,
    ) -> Result<Transaction, Error>;

    async fn adjust_balance(
        &self,
        user: User,
        user_id: Uuid,
        role: Role,
        signed_amount: Decimal,
        reason: String,
    ) -> Result<Transaction, Error>;

    async fn withdraw(
        &self,
        user: User,
        amount: Decimal,
        destination: PayoutDestination,
    ) -> Result<Transaction, Error>;

    async fn top_up(
        &self,
        user: User,
        role: Role,
        amount: Decimal,
        destination: PayoutDestination,
    ) -> Result<Transaction, Error>;

    /// Never fails, unmatched or broken payloads are acknowledged with
    /// `matched: false`.
    async fn reconcile_payment_callback(&self, payload: Value) -> CallbackOutcome;
}

pub trait API: BookingAPI + TripAPI + DispatchAPI + DriverAPI + FinanceAPI + WalletAPI {}
