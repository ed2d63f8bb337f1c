//! Runtime for the persistence layer: entity models and registry, typed
//! repositories, session scoping with commit plans, and the storage
//! backends that apply them. Application-facing surface lives in the
//! `siltdb` facade crate.

pub mod error;
pub mod model;
pub mod query;
pub mod registry;
pub mod repository;
pub mod row;
pub mod session;
pub mod store;
pub mod traits;
pub mod value;

#[cfg(test)]
pub(crate) mod test_fixtures;

/// Upper bound on composite unique-index width.
pub const MAX_INDEX_FIELDS: usize = 4;

///
/// Prelude
///

pub mod prelude {
    pub use crate::{
        error::{ErrorClass, ErrorDetail, ErrorOrigin, InternalError},
        model::{EntityModel, FieldKind, FieldModel, IndexModel},
        query::{CompareOp, Filter, Page},
        registry::EntityRegistry,
        repository::Repository,
        row::{Row, RowEnvelope},
        session::{Session, SessionManager, SessionState},
        store::{ConnectionPool, MemoryDriver, StorageConnection, StorageDriver},
        traits::EntityKind,
        value::{EntityId, Value},
    };
}
