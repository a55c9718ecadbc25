use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{external_provider_error, validation_error, Error};

/// What the gateway is asked to move. `id` is our transaction id and comes
/// back in callbacks as the client reference.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub id: String,
    pub amount: Decimal,
    pub reason: String,
    pub phone_number: String,
    pub payment_method: String,
    pub notify_url: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayReceipt {
    pub txn_id: Option<String>,
    pub raw: Value,
}

impl GatewayReceipt {
    pub fn from_response(raw: Value) -> Self {
        let txn_id = ["TxnId", "txnId", "transactionId"]
            .iter()
            .find_map(|key| match raw.get(*key) {
                Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            });

        Self { txn_id, raw }
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn initiate_deposit(&self, request: PaymentRequest) -> Result<GatewayReceipt, Error>;

    async fn initiate_payout(&self, request: PaymentRequest) -> Result<GatewayReceipt, Error>;
}

/// Plain JSON-over-HTTP gateway client. Request signing lives in front of
/// the gateway, not here.
pub struct HttpPaymentProvider {
    client: reqwest::Client,
    base_url: String,
    merchant_id: Option<String>,
}

impl HttpPaymentProvider {
    pub fn new(base_url: impl Into<String>, merchant_id: Option<String>, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            merchant_id,
        })
    }

    #[tracing::instrument(skip(self, body))]
    async fn post(&self, path: &str, body: Value) -> Result<GatewayReceipt, Error> {
        let url = format!("{}/{}", self.base_url, path);

        let res = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| external_provider_error(format!("gateway unreachable: {}", err)))?;

        let status_code = res.status().as_u16();

        if (400..500).contains(&status_code) {
            return Err(external_provider_error(format!("gateway rejected request ({})", status_code)));
        } else if !(200..300).contains(&status_code) {
            return Err(external_provider_error(format!("gateway failed ({})", status_code)));
        }

        let data: Value = res
            .json()
            .await
            .map_err(|err| external_provider_error(format!("unreadable gateway response: {}", err)))?;

        Ok(GatewayReceipt::from_response(data))
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn initiate_deposit(&self, request: PaymentRequest) -> Result<GatewayReceipt, Error> {
        let mut body = serde_json::to_value(&request)?;
        body["merchantId"] = serde_json::json!(self.merchant_id);

        self.post("direct-payment", body).await
    }

    async fn initiate_payout(&self, request: PaymentRequest) -> Result<GatewayReceipt, Error> {
        let mut body = serde_json::to_value(&request)?;
        body["merchantId"] = serde_json::json!(self.merchant_id);
        body["clientReference"] = Value::String(request.id.clone());
        body["receiverAccountNumber"] = Value::String(request.phone_number.clone());

        self.post("payout-transfer", body).await
    }
}

/// Used when no gateway is configured, every initiation fails.
#[derive(Default)]
pub struct UnconfiguredPaymentProvider;

#[async_trait]
impl PaymentProvider for UnconfiguredPaymentProvider {
    async fn initiate_deposit(&self, _: PaymentRequest) -> Result<GatewayReceipt, Error> {
        Err(external_provider_error("payment gateway not configured"))
    }

    async fn initiate_payout(&self, _: PaymentRequest) -> Result<GatewayReceipt, Error> {
        Err(external_provider_error("payment gateway not configured"))
    }
}

/// Ethiopian mobile numbers in `+2519XXXXXXXX` form.
pub fn normalize_msisdn(raw: &str) -> Result<String, Error> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();

    let local = if let Some(rest) = compact.strip_prefix("+251") {
        rest.to_string()
    } else if let Some(rest) = compact.strip_prefix("251") {
        rest.to_string()
    } else if let Some(rest) = compact.strip_prefix('0') {
        rest.to_string()
    } else {
        compact
    };

    let valid = local.len() == 9 && local.starts_with('9') && local.chars().all(|c| c.is_ascii_digit());
    if !valid {
        return Err(validation_error("phone number must look like +2519XXXXXXXX"));
    }

    Ok(format!("+251{}", local))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn msisdn_forms() {
        assert_eq!(normalize_msisdn("+251911223344").unwrap(), "+251911223344");
        assert_eq!(normalize_msisdn("251911223344").unwrap(), "+251911223344");
        assert_eq!(normalize_msisdn("0911 22 33 44").unwrap(), "+251911223344");
        assert_eq!(normalize_msisdn("911-223-344").unwrap(), "+251911223344");
        assert!(normalize_msisdn("0711223344").is_err());
        assert!(normalize_msisdn("+25191122334").is_err());
        assert!(normalize_msisdn("").is_err());
    }

    #[test]
    fn receipt_picks_up_gateway_txn_id() {
        assert_eq!(
            GatewayReceipt::from_response(json!({ "TxnId": "gw-1" })).txn_id,
            Some("gw-1".to_string())
        );
        assert_eq!(
            GatewayReceipt::from_response(json!({ "txnId": 42 })).txn_id,
            Some("42".to_string())
        );
        assert_eq!(GatewayReceipt::from_response(json!({})).txn_id, None);
    }

    #[tokio::test]
    async fn unconfigured_provider_is_retryable_failure() {
        let provider = UnconfiguredPaymentProvider;
        let request = PaymentRequest {
            id: "t1".into(),
            amount: Decimal::ONE,
            reason: "top up".into(),
            phone_number: "+251911223344".into(),
            payment_method: "telebirr".into(),
            notify_url: None,
        };

        let err = provider.initiate_deposit(request).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
