pub mod memory;
pub mod pool;

// re-exports
pub use memory::MemoryDriver;
pub use pool::{ConnectionPool, PooledConnection};

use crate::{
    error::InternalError,
    session::commit::{CommitPlan, RawKey},
};

///
/// StoredRow
///
/// Versioned raw row returned by drivers. The payload is the entity's
/// encoded row; the version is the optimistic-concurrency token.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredRow {
    pub version: u64,
    pub bytes: Vec<u8>,
}

///
/// StorageConnection
///
/// One checked-out connection to the storage backend. Owned exclusively by
/// a single session for its whole scope.
///
/// Read methods may block on the underlying backend. `scan` returns rows in
/// primary-key order.
///

pub trait StorageConnection: Send {
    fn get(&mut self, entity: &str, key: &RawKey) -> Result<Option<StoredRow>, InternalError>;

    fn scan(&mut self, entity: &str) -> Result<Vec<(RawKey, StoredRow)>, InternalError>;

    /// Apply a commit plan atomically: validate every version expectation,
    /// unique-index claim, and reference check first, then mutate
    /// all-or-nothing.
    fn apply(&mut self, plan: &CommitPlan) -> Result<(), InternalError>;
}

///
/// StorageDriver
///
/// Pluggable storage backend. The driver hands out connections; the pool
/// bounds how many exist at once.
///

pub trait StorageDriver: Send + Sync + 'static {
    fn connect(&self) -> Result<Box<dyn StorageConnection>, InternalError>;
}
