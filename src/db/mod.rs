//! Keyed document persistence. Engine code only talks to [`Store`].

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Bookings,
    Assignments,
    Drivers,
    Wallets,
    Transactions,
    Commissions,
    DriverEarnings,
    AdminEarnings,
    Pricing,
    Trips,
}

impl Table {
    pub const ALL: [Table; 10] = [
        Table::Bookings,
        Table::Assignments,
        Table::Drivers,
        Table::Wallets,
        Table::Transactions,
        Table::Commissions,
        Table::DriverEarnings,
        Table::AdminEarnings,
        Table::Pricing,
        Table::Trips,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Bookings => "bookings",
            Table::Assignments => "booking_assignments",
            Table::Drivers => "drivers",
            Table::Wallets => "wallets",
            Table::Transactions => "transactions",
            Table::Commissions => "commissions",
            Table::DriverEarnings => "driver_earnings",
            Table::AdminEarnings => "admin_earnings",
            Table::Pricing => "pricing",
            Table::Trips => "trips",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Write {
    /// Create or replace.
    Upsert { table: Table, key: String, data: Value },
    /// Create only, an existing key fails the whole changeset with a conflict.
    Insert { table: Table, key: String, data: Value },
}

impl Write {
    pub fn table(&self) -> Table {
        match self {
            Write::Upsert { table, .. } | Write::Insert { table, .. } => *table,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Write::Upsert { key, .. } | Write::Insert { key, .. } => key,
        }
    }
}

/// Writes that must land together or not at all.
#[derive(Clone, Debug, Default)]
pub struct Changeset {
    writes: Vec<Write>,
}

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert<T: Serialize>(
        &mut self,
        table: Table,
        key: impl ToString,
        record: &T,
    ) -> Result<&mut Self, Error> {
        self.writes.push(Write::Upsert {
            table,
            key: key.to_string(),
            data: serde_json::to_value(record)?,
        });

        Ok(self)
    }

    pub fn insert<T: Serialize>(
        &mut self,
        table: Table,
        key: impl ToString,
        record: &T,
    ) -> Result<&mut Self, Error> {
        self.writes.push(Write::Insert {
            table,
            key: key.to_string(),
            data: serde_json::to_value(record)?,
        });

        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn fetch(&self, table: Table, key: &str) -> Result<Option<Value>, Error>;

    /// Documents whose top-level string `field` equals `value`.
    async fn find_by(&self, table: Table, field: &str, value: &str) -> Result<Vec<Value>, Error>;

    async fn fetch_all(&self, table: Table) -> Result<Vec<Value>, Error>;

    async fn commit(&self, changes: Changeset) -> Result<(), Error>;
}
