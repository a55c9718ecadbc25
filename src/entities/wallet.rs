use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{conflict_error, Error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Driver,
    Passenger,
    Admin,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Driver => "driver",
            Self::Passenger => "passenger",
            Self::Admin => "admin",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: Uuid,
    pub role: Role,
    pub balance: Decimal,
    pub total_earnings: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            role,
            balance: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    pub fn key_for(user_id: &Uuid, role: Role) -> String {
        format!("{}:{}", user_id, role.name())
    }

    pub fn key(&self) -> String {
        Self::key_for(&self.user_id, self.role)
    }

    /// The only way a balance moves. The transaction must already be
    /// successful and belong to this wallet.
    pub fn apply(&mut self, tx: &Transaction) -> Result<(), Error> {
        if tx.status != TransactionStatus::Success {
            return Err(conflict_error(format!(
                "transaction {} is {}, only successful transactions move balances",
                tx.id,
                tx.status.name()
            )));
        }

        if tx.user_id != self.user_id || tx.role != self.role {
            return Err(conflict_error(format!(
                "transaction {} does not belong to wallet {}",
                tx.id,
                self.key()
            )));
        }

        self.balance += tx.signed_amount();
        self.updated_at = tx.updated_at;

        Ok(())
    }

    pub fn record_earnings(&mut self, amount: Decimal) {
        self.total_earnings += amount;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Credit,
    Debit,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Wallet,
    Cash,
    Gateway,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    /// Always a positive magnitude, direction comes from `kind`.
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub method: PaymentMethod,
    pub status: TransactionStatus,
    pub reason: String,
    pub ref_id: Option<String>,
    pub txn_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        user_id: Uuid,
        role: Role,
        amount: Decimal,
        kind: TransactionKind,
        method: PaymentMethod,
        reason: impl Into<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            user_id,
            role,
            amount,
            kind,
            method,
            status: TransactionStatus::Pending,
            reason: reason.into(),
            ref_id: None,
            txn_id: None,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    /// Internal ledger moves settle immediately.
    pub fn internal(
        user_id: Uuid,
        role: Role,
        amount: Decimal,
        kind: TransactionKind,
        reason: impl Into<String>,
    ) -> Self {
        let mut tx = Self::new(user_id, role, amount, kind, PaymentMethod::Wallet, reason);
        tx.status = TransactionStatus::Success;
        tx
    }

    pub fn wallet_key(&self) -> String {
        Wallet::key_for(&self.user_id, self.role)
    }

    pub fn signed_amount(&self) -> Decimal {
        match self.kind {
            TransactionKind::Credit => self.amount,
            TransactionKind::Debit => -self.amount,
        }
    }

    /// pending -> success|failed, exactly once.
    #[tracing::instrument(skip(self), fields(transaction_id = %self.id))]
    pub fn settle(&mut self, status: TransactionStatus) -> Result<(), Error> {
        if self.status.is_terminal() {
            return Err(conflict_error(format!(
                "transaction {} is already {}",
                self.id,
                self.status.name()
            )));
        }

        self.status = status;
        self.updated_at = Utc::now();

        Ok(())
    }
}
