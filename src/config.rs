use rust_decimal::Decimal;
use std::{env, str::FromStr, time::Duration};
use uuid::Uuid;

use crate::error::{config_error, Error};

#[derive(Clone, Debug)]
pub struct Config {
    /// In-memory store when absent.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub dispatch_radius_km: f64,
    pub dispatch_ttl: Duration,
    pub dispatch_sweep_interval: Duration,
    pub tracking_interval: Duration,
    pub default_commission_rate: Decimal,
    pub minimum_fare: Decimal,
    pub nearby_limit: usize,
    /// Owner of the platform wallet that collects commission.
    pub platform_account_id: Uuid,
    pub payment_gateway_url: Option<String>,
    pub payment_notify_url: Option<String>,
    pub payment_merchant_id: Option<String>,
    pub payment_timeout: Duration,
    pub user_service_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 5,
            dispatch_radius_km: 5.0,
            dispatch_ttl: Duration::from_secs(5 * 60),
            dispatch_sweep_interval: Duration::from_secs(30),
            tracking_interval: Duration::from_secs(60),
            default_commission_rate: Decimal::from(15),
            minimum_fare: Decimal::from(2),
            nearby_limit: 20,
            platform_account_id: Uuid::nil(),
            payment_gateway_url: None,
            payment_notify_url: None,
            payment_merchant_id: None,
            payment_timeout: Duration::from_secs(10),
            user_service_url: None,
        }
    }
}

impl Config {
    #[tracing::instrument(name = "Config::from_env")]
    pub fn from_env() -> Result<Self, Error> {
        dotenv::dotenv().ok();

        let defaults = Self::default();

        Ok(Self {
            database_url: optional("DATABASE_URL"),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.database_max_connections),
            dispatch_radius_km: parsed("DISPATCH_RADIUS_KM")?
                .unwrap_or(defaults.dispatch_radius_km),
            dispatch_ttl: parsed("DISPATCH_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.dispatch_ttl),
            dispatch_sweep_interval: parsed("DISPATCH_SWEEP_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.dispatch_sweep_interval),
            tracking_interval: parsed("TRACKING_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.tracking_interval),
            default_commission_rate: parsed("COMMISSION_RATE")?
                .unwrap_or(defaults.default_commission_rate),
            minimum_fare: parsed("MINIMUM_FARE")?.unwrap_or(defaults.minimum_fare),
            nearby_limit: parsed("NEARBY_LIMIT")?.unwrap_or(defaults.nearby_limit),
            platform_account_id: parsed("ADMIN_USER_ID")?
                .unwrap_or(defaults.platform_account_id),
            payment_gateway_url: optional("PAYMENT_GATEWAY_URL"),
            payment_notify_url: optional("PAYMENT_NOTIFY_URL"),
            payment_merchant_id: optional("PAYMENT_MERCHANT_ID"),
            payment_timeout: parsed("PAYMENT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.payment_timeout),
            user_service_url: optional("USER_SERVICE_URL"),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parsed<T: FromStr>(key: &str) -> Result<Option<T>, Error> {
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| config_error(key)),
        None => Ok(None),
    }
}

#[test]
fn default_config_test() {
    let config = Config::default();

    assert_eq!(config.dispatch_radius_km, 5.0);
    assert_eq!(config.dispatch_ttl, Duration::from_secs(300));
    assert_eq!(config.default_commission_rate, Decimal::from(15));
    assert_eq!(config.nearby_limit, 20);
    assert!(config.database_url.is_none());
}

#[test]
fn malformed_value_is_config_error_test() {
    env::set_var("RIDECORE_TEST_BAD_NUMBER", "five");

    let result = parsed::<f64>("RIDECORE_TEST_BAD_NUMBER");
    assert_eq!(result.unwrap_err().code, 1);

    env::remove_var("RIDECORE_TEST_BAD_NUMBER");
}
