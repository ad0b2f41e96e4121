//! Shared in-memory catalog state for the fake backends.
//!
//! The catalog client and the SQL executor operate on the same store, so
//! a table created through DDL is visible to control-plane reads and vice
//! versa, mirroring how the real backends converge on one metastore.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use brickkit_engine::StateRecord;

/// Shared record map keyed by fully qualified name.
#[derive(Debug, Default, Clone)]
pub struct CatalogStore {
    records: Arc<Mutex<BTreeMap<String, StateRecord>>>,
}

impl CatalogStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds observed state before a test run.
    pub fn seed(&self, record: StateRecord) {
        self.lock().insert(record.full_name.clone(), record);
    }

    /// Returns a clone of the record for `full_name`.
    #[must_use]
    pub fn get(&self, full_name: &str) -> Option<StateRecord> {
        self.lock().get(full_name).cloned()
    }

    /// Returns true when a record exists.
    #[must_use]
    pub fn contains(&self, full_name: &str) -> bool {
        self.lock().contains_key(full_name)
    }

    /// Inserts or replaces a record.
    pub fn put(&self, record: StateRecord) {
        self.lock().insert(record.full_name.clone(), record);
    }

    /// Removes a record, returning it.
    pub fn remove(&self, full_name: &str) -> Option<StateRecord> {
        self.lock().remove(full_name)
    }

    /// Mutates the record for `full_name` in place.
    ///
    /// Returns false when the record does not exist.
    pub fn update<F>(&self, full_name: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut StateRecord),
    {
        let mut records = self.lock();
        match records.get_mut(full_name) {
            Some(record) => {
                mutate(record);
                true
            }
            None => false,
        }
    }

    /// Returns clones of records whose name starts with `prefix` and that
    /// sit exactly one dotted level below it.
    #[must_use]
    pub fn children_of(&self, parent_full_name: &str) -> Vec<StateRecord> {
        let prefix = format!("{parent_full_name}.");
        self.lock()
            .iter()
            .filter(|(name, _)| {
                name.starts_with(&prefix) && !name[prefix.len()..].contains('.')
            })
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Returns every stored fully qualified name.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, StateRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
