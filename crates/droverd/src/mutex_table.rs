//! Per-transaction mutex table.
//!
//! Metadata for a non-blocking transaction is written by its background
//! task and read by the status-query path; the per-transaction mutex
//! serialises that access. The table itself is guarded by one short-held
//! mutex. Entries exist exactly while a task for the transaction is
//! scheduled or running: they are added before the task is enqueued and
//! removed after the task writes its final metadata.
//!
//! Ordering rule: the table-level mutex is never held while a
//! per-transaction mutex is locked. [`TransactionMutexTable::get`] hands
//! out a clone of the `Arc`, so callers lock only after the table lock has
//! been released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::warn;

/// Tracing target for mutex table operations.
const MUTEX_TARGET: &str = "droverd::mutex_table";

/// Errors raised by mutex table operations.
#[derive(Debug, Error)]
pub enum MutexTableError {
    /// No entry exists for the transaction.
    #[error("no mutex registered for transaction '{transaction_id}'")]
    Unknown {
        /// Transaction that was looked up.
        transaction_id: String,
    },

    /// The table-level mutex was poisoned by a panicking holder.
    #[error("the transaction mutex table is poisoned")]
    Poisoned,
}

/// Table mapping transaction ids to their access mutexes.
#[derive(Debug, Default)]
pub struct TransactionMutexTable {
    entries: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TransactionMutexTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mutex for the transaction.
    ///
    /// Registering an id that already has an entry is unexpected but
    /// harmless; the existing mutex is kept and a warning is logged.
    ///
    /// # Errors
    ///
    /// Returns [`MutexTableError::Poisoned`] when the table lock is
    /// poisoned.
    pub fn add(&self, transaction_id: &str) -> Result<(), MutexTableError> {
        let mut entries = self.entries.lock().map_err(|_| MutexTableError::Poisoned)?;
        if entries.contains_key(transaction_id) {
            warn!(
                target: MUTEX_TARGET,
                transaction = transaction_id,
                "mutex for transaction is already registered"
            );
        } else {
            entries.insert(transaction_id.to_owned(), Arc::new(Mutex::new(())));
        }
        Ok(())
    }

    /// Returns the mutex registered for the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`MutexTableError::Unknown`] when no entry exists and
    /// [`MutexTableError::Poisoned`] when the table lock is poisoned.
    pub fn get(&self, transaction_id: &str) -> Result<Arc<Mutex<()>>, MutexTableError> {
        let entries = self.entries.lock().map_err(|_| MutexTableError::Poisoned)?;
        entries
            .get(transaction_id)
            .cloned()
            .ok_or_else(|| MutexTableError::Unknown {
                transaction_id: transaction_id.to_owned(),
            })
    }

    /// Removes the entry for the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`MutexTableError::Unknown`] when no entry exists and
    /// [`MutexTableError::Poisoned`] when the table lock is poisoned.
    pub fn remove(&self, transaction_id: &str) -> Result<(), MutexTableError> {
        let mut entries = self.entries.lock().map_err(|_| MutexTableError::Poisoned)?;
        entries
            .remove(transaction_id)
            .map(|_| ())
            .ok_or_else(|| MutexTableError::Unknown {
                transaction_id: transaction_id.to_owned(),
            })
    }

    /// Returns `true` when an entry exists for the transaction.
    #[must_use]
    pub fn contains(&self, transaction_id: &str) -> bool {
        self.entries
            .lock()
            .map(|entries| entries.contains_key(transaction_id))
            .unwrap_or(false)
    }
}
