use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{Changeset, Store, Table, Write};
use crate::error::{conflict_error, Error};

type Documents = HashMap<Table, BTreeMap<String, Value>>;

/// Process-local store. A commit holds the write lock for the whole
/// changeset, so readers never see half of it.
#[derive(Default, Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Documents>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn field_matches(doc: &Value, field: &str, value: &str) -> bool {
    doc.get(field).and_then(Value::as_str) == Some(value)
}

#[async_trait]
impl Store for MemoryStore {
    async fn fetch(&self, table: Table, key: &str) -> Result<Option<Value>, Error> {
        let tables = self.tables.read().await;
        Ok(tables.get(&table).and_then(|docs| docs.get(key)).cloned())
    }

    async fn find_by(&self, table: Table, field: &str, value: &str) -> Result<Vec<Value>, Error> {
        let tables = self.tables.read().await;

        Ok(tables
            .get(&table)
            .map(|docs| {
                docs.values()
                    .filter(|doc| field_matches(doc, field, value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_all(&self, table: Table) -> Result<Vec<Value>, Error> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&table)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn commit(&self, changes: Changeset) -> Result<(), Error> {
        let mut tables = self.tables.write().await;

        let mut inserted = HashSet::new();
        for write in changes.writes() {
            if let Write::Insert { table, key, .. } = write {
                let exists = tables
                    .get(table)
                    .map(|docs| docs.contains_key(key))
                    .unwrap_or(false);

                if exists || !inserted.insert((*table, key.clone())) {
                    return Err(conflict_error(format!(
                        "{} {} already exists",
                        table.name(),
                        key
                    )));
                }
            }
        }

        for write in changes.into_writes() {
            match write {
                Write::Upsert { table, key, data } | Write::Insert { table, key, data } => {
                    tables.entry(table).or_default().insert(key, data);
                }
            }
        }

        Ok(())
    }
}
