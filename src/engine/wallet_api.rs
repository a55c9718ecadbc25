use super::helpers::{fetch_transaction, fetch_wallet, find_by, resolve_commission_rate};
use super::locks::{transaction_key, wallet_key};
use super::Engine;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::future::Future;
use std::str::FromStr;
use uuid::Uuid;

use crate::{
    api::{CallbackOutcome, PayoutDestination, WalletAPI},
    auth::{Platform, User},
    db::{Changeset, Table},
    entities::{PaymentMethod, Role, Transaction, TransactionKind, TransactionStatus, Wallet},
    error::{
        external_provider_error, insufficient_balance_error, not_found_error, permission_error,
        validation_error, Error,
    },
    external::{normalize_msisdn, GatewayReceipt, PaymentRequest},
    finance::{calculate_package, round_money},
};

const REFERENCE_KEYS: [&str; 5] = ["thirdPartyId", "ID", "id", "transactionId", "clientReference"];
const GATEWAY_ID_KEYS: [&str; 2] = ["TxnId", "txnId"];
const STATUS_KEYS: [&str; 2] = ["Status", "status"];

/// The parts of a gateway callback we act on.
#[derive(Debug, PartialEq)]
struct GatewayCallback {
    reference: Option<String>,
    txn_id: Option<String>,
    status: TransactionStatus,
    amount: Option<Decimal>,
    adjusted_amount: Option<Decimal>,
}

impl GatewayCallback {
    fn parse(payload: &Value) -> Self {
        Self {
            reference: first_string(payload, &REFERENCE_KEYS),
            txn_id: first_string(payload, &GATEWAY_ID_KEYS),
            status: first_string(payload, &STATUS_KEYS)
                .map(|s| parse_status(&s))
                .unwrap_or(TransactionStatus::Pending),
            amount: decimal_field(payload, "amount"),
            adjusted_amount: decimal_field(payload, "adjustedAmount"),
        }
    }

    /// Credits settle at the adjusted amount when the gateway reports one.
    fn provider_amount(&self, kind: TransactionKind) -> Option<Decimal> {
        match kind {
            TransactionKind::Credit => self.adjusted_amount.or(self.amount),
            TransactionKind::Debit => self.amount.or(self.adjusted_amount),
        }
    }
}

fn parse_status(raw: &str) -> TransactionStatus {
    match raw.trim().to_uppercase().as_str() {
        "COMPLETED" | "SUCCESS" | "APPROVED" => TransactionStatus::Success,
        "FAILED" | "CANCELLED" | "DECLINED" => TransactionStatus::Failed,
        _ => TransactionStatus::Pending,
    }
}

fn first_string(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match payload.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn decimal_field(payload: &Value, key: &str) -> Option<Decimal> {
    match payload.get(key) {
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Some(Value::String(s)) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn merge_metadata(metadata: &mut Value, key: &str, value: Value) {
    match metadata {
        Value::Object(map) => {
            map.insert(key.to_string(), value);
        }
        other => {
            let mut map = serde_json::Map::new();
            map.insert(key.to_string(), value);
            *other = Value::Object(map);
        }
    }
}

fn money_amount(amount: Decimal) -> Result<Decimal, Error> {
    let amount = round_money(amount);

    if amount <= Decimal::ZERO {
        return Err(validation_error("amount must be positive"));
    }

    Ok(amount)
}

#[async_trait]
impl WalletAPI for Engine {
    #[tracing::instrument(skip(self))]
    async fn find_wallet(&self, user: User, user_id: Uuid, role: Role) -> Result<Wallet, Error> {
        if user.id != user_id {
            self.authorize(user.clone(), "read_wallets", Platform)?;
        }

        fetch_wallet(&*self.store, &user_id, role).await
    }

    #[tracing::instrument(skip(self))]
    async fn list_transactions(
        &self,
        user: User,
        user_id: Uuid,
        role: Role,
    ) -> Result<Vec<Transaction>, Error> {
        if user.id != user_id {
            self.authorize(user.clone(), "read_wallets", Platform)?;
        }

        let mut transactions: Vec<Transaction> =
            find_by(&*self.store, Table::Transactions, "user_id", &user_id.to_string()).await?;

        transactions.retain(|tx| tx.role == role);
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(transactions)
    }

    #[tracing::instrument(skip(self))]
    async fn credit(
        &self,
        user: User,
        user_id: Uuid,
        role: Role,
        amount: Decimal,
        reason: String,
    ) -> Result<Transaction, Error> {
        self.authorize(user.clone(), "manage_wallets", Platform)?;

        let amount = money_amount(amount)?;

        self.apply_internal(user_id, role, amount, TransactionKind::Credit, reason)
            .await
    }

    /// May take the balance below zero.
    #[tracing::instrument(skip(self))]
    async fn debit(
        &self,
        user: User,
        user_id: Uuid,
        role: Role,
        amount: Decimal,
        reason: String,
    ) -> Result<Transaction, Error> {
        self.authorize(user.clone(), "manage_wallets", Platform)?;

        let amount = money_amount(amount)?;

        self.apply_internal(user_id, role, amount, TransactionKind::Debit, reason)
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn adjust_balance(
        &self,
        user: User,
        user_id: Uuid,
        role: Role,
        signed_amount: Decimal,
        reason: String,
    ) -> Result<Transaction, Error> {
        self.authorize(user.clone(), "manage_wallets", Platform)?;

        let kind = if signed_amount.is_sign_negative() {
            TransactionKind::Debit
        } else {
            TransactionKind::Credit
        };
        let amount = money_amount(signed_amount.abs())?;

        self.apply_internal(user_id, role, amount, kind, reason).await
    }

    #[tracing::instrument(skip(self, destination))]
    async fn withdraw(
        &self,
        user: User,
        amount: Decimal,
        destination: PayoutDestination,
    ) -> Result<Transaction, Error> {
        self.authorize(user.clone(), "withdraw", Platform)?;

        let amount = money_amount(amount)?;
        let phone = normalize_msisdn(&destination.phone)?;

        let tx = {
            let _guard = self
                .locks
                .lock(&wallet_key(&Wallet::key_for(&user.id, Role::Driver)))
                .await;

            let wallet = fetch_wallet(&*self.store, &user.id, Role::Driver).await?;
            let reserved = self.pending_withdrawals(&user.id).await?;

            if wallet.balance - reserved < amount {
                return Err(insufficient_balance_error(format!(
                    "balance {} with {} awaiting payout is less than {}",
                    wallet.balance, reserved, amount
                )));
            }

            self.pending_gateway_transaction(
                user.id,
                Role::Driver,
                amount,
                TransactionKind::Debit,
                "withdrawal",
                &phone,
                &destination.payment_method,
            )
            .await?
        };

        let request = self.payment_request(&tx, phone, destination.payment_method);

        self.await_initiation(tx, self.payments.initiate_payout(request))
            .await
    }

    #[tracing::instrument(skip(self, destination))]
    async fn top_up(
        &self,
        user: User,
        role: Role,
        amount: Decimal,
        destination: PayoutDestination,
    ) -> Result<Transaction, Error> {
        if role == Role::Admin {
            return Err(validation_error("the platform wallet cannot be topped up"));
        }

        self.authorize(user.clone(), "top_up", Platform)?;

        if !user.has_role(role.name().to_string()) && !user.is_privileged() {
            return Err(permission_error());
        }

        let amount = money_amount(amount)?;
        let phone = normalize_msisdn(&destination.phone)?;

        let tx = self
            .pending_gateway_transaction(
                user.id,
                role,
                amount,
                TransactionKind::Credit,
                "top up",
                &phone,
                &destination.payment_method,
            )
            .await?;

        let request = self.payment_request(&tx, phone, destination.payment_method);

        self.await_initiation(tx, self.payments.initiate_deposit(request))
            .await
    }

    #[tracing::instrument(skip(self, payload))]
    async fn reconcile_payment_callback(&self, payload: Value) -> CallbackOutcome {
        match self.reconcile(payload).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(%err, "payment callback could not be applied");
                CallbackOutcome::default()
            }
        }
    }
}

impl Engine {
    /// Settled ledger move under the wallet lock.
    async fn apply_internal(
        &self,
        user_id: Uuid,
        role: Role,
        amount: Decimal,
        kind: TransactionKind,
        reason: String,
    ) -> Result<Transaction, Error> {
        let _guard = self
            .locks
            .lock(&wallet_key(&Wallet::key_for(&user_id, role)))
            .await;

        let mut wallet = fetch_wallet(&*self.store, &user_id, role).await?;
        let tx = Transaction::internal(user_id, role, amount, kind, reason);

        wallet.apply(&tx)?;

        let mut changes = Changeset::new();
        changes
            .upsert(Table::Wallets, wallet.key(), &wallet)?
            .insert(Table::Transactions, tx.id, &tx)?;
        self.store.commit(changes).await?;

        tracing::info!(transaction_id = %tx.id, balance = %wallet.balance, "wallet updated");

        self.announce_wallet(&wallet, Some(&tx));

        Ok(tx)
    }

    /// Payouts the gateway has not confirmed yet still hold their amount.
    async fn pending_withdrawals(&self, user_id: &Uuid) -> Result<Decimal, Error> {
        let transactions: Vec<Transaction> =
            find_by(&*self.store, Table::Transactions, "user_id", &user_id.to_string()).await?;

        Ok(transactions
            .iter()
            .filter(|tx| {
                tx.role == Role::Driver
                    && tx.kind == TransactionKind::Debit
                    && tx.method == PaymentMethod::Gateway
                    && tx.status == TransactionStatus::Pending
            })
            .map(|tx| tx.amount)
            .sum())
    }

    #[allow(clippy::too_many_arguments)]
    async fn pending_gateway_transaction(
        &self,
        user_id: Uuid,
        role: Role,
        amount: Decimal,
        kind: TransactionKind,
        reason: &str,
        phone: &str,
        payment_method: &str,
    ) -> Result<Transaction, Error> {
        let mut tx = Transaction::new(user_id, role, amount, kind, PaymentMethod::Gateway, reason);
        tx.ref_id = Some(tx.id.to_string());
        tx.metadata = json!({
            "phone": phone,
            "paymentMethod": payment_method,
        });

        let mut changes = Changeset::new();
        changes.insert(Table::Transactions, tx.id, &tx)?;
        self.store.commit(changes).await?;

        Ok(tx)
    }

    fn payment_request(&self, tx: &Transaction, phone: String, payment_method: String) -> PaymentRequest {
        PaymentRequest {
            id: tx.id.to_string(),
            amount: tx.amount,
            reason: tx.reason.clone(),
            phone_number: phone,
            payment_method,
            notify_url: self.config.payment_notify_url.clone(),
        }
    }

    /// Waits for the gateway within the configured timeout. Success keeps the
    /// transaction pending until the callback; failure marks it failed.
    #[tracing::instrument(skip(self, tx, call), fields(transaction_id = %tx.id))]
    async fn await_initiation<F>(&self, tx: Transaction, call: F) -> Result<Transaction, Error>
    where
        F: Future<Output = Result<GatewayReceipt, Error>> + Send,
    {
        let outcome = match tokio::time::timeout(self.config.payment_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(external_provider_error("payment gateway timed out")),
        };

        let _guard = self.locks.lock(&transaction_key(&tx.id)).await;

        let mut current = fetch_transaction(&*self.store, &tx.id)
            .await?
            .unwrap_or(tx);

        match outcome {
            Ok(receipt) => {
                // the callback can beat us here
                if current.status.is_terminal() {
                    return Ok(current);
                }

                if current.txn_id.is_none() {
                    current.txn_id = receipt.txn_id;
                }
                merge_metadata(&mut current.metadata, "initiation", receipt.raw);
                current.updated_at = Utc::now();

                let mut changes = Changeset::new();
                changes.upsert(Table::Transactions, current.id, &current)?;
                self.store.commit(changes).await?;

                tracing::info!(txn_id = ?current.txn_id, "gateway accepted request");

                Ok(current)
            }
            Err(err) => {
                tracing::warn!(%err, "gateway initiation failed");

                if !current.status.is_terminal() {
                    current.settle(TransactionStatus::Failed)?;
                    merge_metadata(&mut current.metadata, "error", json!(err.message.clone()));

                    let mut changes = Changeset::new();
                    changes.upsert(Table::Transactions, current.id, &current)?;
                    self.store.commit(changes).await?;
                }

                if err.is_retryable() {
                    Err(err)
                } else {
                    Err(external_provider_error(err.message))
                }
            }
        }
    }

    async fn locate_transaction(&self, callback: &GatewayCallback) -> Result<Option<Transaction>, Error> {
        if let Some(reference) = &callback.reference {
            if let Ok(id) = Uuid::parse_str(reference) {
                if let Some(tx) = fetch_transaction(&*self.store, &id).await? {
                    return Ok(Some(tx));
                }
            }

            let by_ref: Vec<Transaction> =
                find_by(&*self.store, Table::Transactions, "ref_id", reference).await?;
            if let Some(tx) = by_ref.into_iter().next() {
                return Ok(Some(tx));
            }
        }

        if let Some(txn_id) = &callback.txn_id {
            let by_gateway: Vec<Transaction> =
                find_by(&*self.store, Table::Transactions, "txn_id", txn_id).await?;
            return Ok(by_gateway.into_iter().next());
        }

        Ok(None)
    }

    /// Replays of an already settled transaction are acknowledged without
    /// touching the wallet again.
    #[tracing::instrument(skip(self, payload))]
    async fn reconcile(&self, payload: Value) -> Result<CallbackOutcome, Error> {
        let callback = GatewayCallback::parse(&payload);

        let found = match self.locate_transaction(&callback).await? {
            Some(tx) => tx,
            None => {
                tracing::warn!(reference = ?callback.reference, txn_id = ?callback.txn_id, "unmatched payment callback");
                return Ok(CallbackOutcome::default());
            }
        };

        let _tx_guard = self.locks.lock(&transaction_key(&found.id)).await;
        let mut tx = fetch_transaction(&*self.store, &found.id)
            .await?
            .ok_or_else(|| not_found_error(format!("transaction {}", found.id)))?;

        if tx.status.is_terminal() {
            tracing::info!(transaction_id = %tx.id, status = tx.status.name(), "callback replay ignored");
            return Ok(CallbackOutcome {
                matched: true,
                applied: false,
                transaction_id: Some(tx.id),
                status: Some(tx.status),
            });
        }

        merge_metadata(&mut tx.metadata, "callback", payload);
        if tx.txn_id.is_none() {
            tx.txn_id = callback.txn_id.clone();
        }

        let mut changes = Changeset::new();

        let wallet = match callback.status {
            TransactionStatus::Pending => {
                tx.updated_at = Utc::now();
                changes.upsert(Table::Transactions, tx.id, &tx)?;
                self.store.commit(changes).await?;

                return Ok(CallbackOutcome {
                    matched: true,
                    applied: false,
                    transaction_id: Some(tx.id),
                    status: Some(tx.status),
                });
            }
            TransactionStatus::Failed => {
                tx.settle(TransactionStatus::Failed)?;
                changes.upsert(Table::Transactions, tx.id, &tx)?;
                self.store.commit(changes).await?;

                None
            }
            TransactionStatus::Success => {
                let provider_amount = callback.provider_amount(tx.kind).unwrap_or(tx.amount);
                let amount = round_money(self.credited_amount(&mut tx, provider_amount).await?);

                // Stays pending so a corrected callback can still settle it.
                if amount <= Decimal::ZERO {
                    tracing::warn!(transaction_id = %tx.id, %provider_amount, "success callback without a usable amount");

                    merge_metadata(
                        &mut tx.metadata,
                        "anomaly",
                        json!({ "reason": "no usable amount", "providerAmount": provider_amount }),
                    );
                    tx.updated_at = Utc::now();
                    changes.upsert(Table::Transactions, tx.id, &tx)?;
                    self.store.commit(changes).await?;

                    return Ok(CallbackOutcome {
                        matched: true,
                        applied: false,
                        transaction_id: Some(tx.id),
                        status: Some(tx.status),
                    });
                }

                merge_metadata(&mut tx.metadata, "providerAmount", json!(provider_amount));
                tx.amount = amount;

                let _wallet_guard = self.locks.lock(&wallet_key(&tx.wallet_key())).await;
                let mut wallet = fetch_wallet(&*self.store, &tx.user_id, tx.role).await?;

                tx.settle(TransactionStatus::Success)?;
                wallet.apply(&tx)?;

                changes
                    .upsert(Table::Transactions, tx.id, &tx)?
                    .upsert(Table::Wallets, wallet.key(), &wallet)?;
                self.store.commit(changes).await?;

                Some(wallet)
            }
        };

        tracing::info!(transaction_id = %tx.id, status = tx.status.name(), amount = %tx.amount, "callback applied");

        match &wallet {
            Some(wallet) => self.announce_wallet(wallet, Some(&tx)),
            None => self.publish(
                &self.wallet_channel(&tx.user_id, tx.role),
                crate::notify::events::WALLET_UPDATE,
                json!({ "transactionId": tx.id, "status": tx.status }),
            ),
        }

        Ok(CallbackOutcome {
            matched: true,
            applied: true,
            transaction_id: Some(tx.id),
            status: Some(tx.status),
        })
    }

    /// Driver deposits buy package credit at the driver's commission rate.
    /// A deposit that cannot be converted is credited as paid and flagged.
    async fn credited_amount(&self, tx: &mut Transaction, provider_amount: Decimal) -> Result<Decimal, Error> {
        let converts = tx.kind == TransactionKind::Credit
            && tx.role == Role::Driver
            && tx.method == PaymentMethod::Gateway;

        if !converts {
            return Ok(provider_amount);
        }

        let rate =
            resolve_commission_rate(&*self.store, &tx.user_id, self.config.default_commission_rate).await?;
        let package = calculate_package(provider_amount, rate);

        if package <= Decimal::ZERO && provider_amount > Decimal::ZERO {
            tracing::warn!(transaction_id = %tx.id, %rate, "commission rate cannot convert deposits, crediting the raw amount");
            merge_metadata(
                &mut tx.metadata,
                "packageConversion",
                json!({ "converted": false, "rate": rate }),
            );
            return Ok(provider_amount);
        }

        merge_metadata(
            &mut tx.metadata,
            "packageConversion",
            json!({ "converted": true, "rate": rate }),
        );

        Ok(package)
    }

    fn announce_wallet(&self, wallet: &Wallet, tx: Option<&Transaction>) {
        self.publish(
            &self.wallet_channel(&wallet.user_id, wallet.role),
            crate::notify::events::WALLET_UPDATE,
            json!({
                "userId": wallet.user_id,
                "role": wallet.role,
                "balance": wallet.balance,
                "transactionId": tx.map(|tx| tx.id),
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_reference_status_and_amounts() {
        let callback = GatewayCallback::parse(&json!({
            "thirdPartyId": "abc",
            "TxnId": "T-1",
            "Status": "completed",
            "amount": "100",
            "adjustedAmount": 98.5,
        }));

        assert_eq!(callback.reference.as_deref(), Some("abc"));
        assert_eq!(callback.txn_id.as_deref(), Some("T-1"));
        assert_eq!(callback.status, TransactionStatus::Success);
        assert_eq!(callback.provider_amount(TransactionKind::Credit), Some(dec!(98.5)));
        assert_eq!(callback.provider_amount(TransactionKind::Debit), Some(dec!(100)));
    }

    #[test]
    fn reference_key_precedence() {
        let callback = GatewayCallback::parse(&json!({
            "clientReference": "last",
            "id": "middle",
        }));

        assert_eq!(callback.reference.as_deref(), Some("middle"));
    }

    #[test]
    fn status_normalisation() {
        assert_eq!(parse_status("APPROVED"), TransactionStatus::Success);
        assert_eq!(parse_status("success"), TransactionStatus::Success);
        assert_eq!(parse_status("Declined"), TransactionStatus::Failed);
        assert_eq!(parse_status("CANCELLED"), TransactionStatus::Failed);
        assert_eq!(parse_status("PROCESSING"), TransactionStatus::Pending);
    }

    #[test]
    fn missing_fields_stay_pending() {
        let callback = GatewayCallback::parse(&json!({}));

        assert_eq!(callback.reference, None);
        assert_eq!(callback.status, TransactionStatus::Pending);
        assert_eq!(callback.provider_amount(TransactionKind::Credit), None);
    }

    #[test]
    fn metadata_merges_into_objects() {
        let mut metadata = Value::Null;
        merge_metadata(&mut metadata, "a", json!(1));
        merge_metadata(&mut metadata, "b", json!(2));

        assert_eq!(metadata, json!({ "a": 1, "b": 2 }));
    }

    #[test]
    fn amounts_are_rounded_and_positive() {
        assert_eq!(money_amount(dec!(10.005)).unwrap(), dec!(10.01));
        assert!(money_amount(dec!(0.001)).unwrap_err().is_validation_error());
        assert!(money_amount(dec!(-5)).unwrap_err().is_validation_error());
    }
}
