//! In-process transactional store
//!
//! Every transaction works on a staged copy of the tables while holding the
//! store lock. Returning `Ok` swaps the copy in; returning `Err` discards it,
//! so callers never observe a half-applied change.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use uuid::Uuid;

use super::games::GameRow;
use super::queue::QueueRow;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate key {key} in {table}")]
    UniqueViolation { table: &'static str, key: Uuid },

    #[error("no row {key} in {table}")]
    NotFound { table: &'static str, key: Uuid },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Committed rows, read in place
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub(super) queue: HashMap<Uuid, QueueRow>,
    /// Insertion counter giving queue rows a stable FIFO order
    pub(super) queue_seq: u64,
    pub(super) games: HashMap<Uuid, GameRow>,
}

/// Staged view of the tables inside one transaction
#[derive(Debug)]
pub struct Transaction {
    pub(super) tables: Tables,
}

impl Deref for Transaction {
    type Target = Tables;

    fn deref(&self) -> &Tables {
        &self.tables
    }
}

#[derive(Default)]
struct StoreState {
    tables: Tables,
    #[cfg(test)]
    fail_commits: bool,
}

impl StoreState {
    #[cfg(test)]
    fn refuses_commit(&self) -> bool {
        self.fail_commits
    }

    #[cfg(not(test))]
    fn refuses_commit(&self) -> bool {
        false
    }
}

/// Shared handle to the store
#[derive(Clone, Default)]
pub struct Store {
    state: Arc<Mutex<StoreState>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` atomically against a staged copy of the tables.
    ///
    /// Transactions are serialized; none observes another's uncommitted rows.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut state = self.state.lock();
        let mut tx = Transaction {
            tables: state.tables.clone(),
        };

        let value = f(&mut tx)?;

        if state.refuses_commit() {
            return Err(StoreError::Unavailable("commit refused".to_string()).into());
        }

        state.tables = tx.tables;
        Ok(value)
    }

    /// Read-only access to committed rows, borrowed under the lock
    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let state = self.state.lock();
        f(&state.tables)
    }

    /// Make every following commit fail, as if the backing database went away
    #[cfg(test)]
    pub fn fail_commits(&self, fail: bool) {
        self.state.lock().fail_commits = fail;
    }
}
