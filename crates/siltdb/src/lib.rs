//! Application-facing surface of the persistence layer.
//!
//! ## Crate layout
//! - `config`: TOML-backed database configuration.
//! - `database`: the `Database` entry point, repositories, and sessions.
//! - `error`: public error taxonomy mapped from the runtime.
//!
//! The runtime itself (models, registry, commit plans, storage drivers)
//! lives in `siltdb-core` and is re-exported as [`core`].

pub use siltdb_core as core;

pub mod config;
pub mod database;
pub mod error;

pub use config::{DatabaseConfig, PoolConfig};
pub use database::{Database, Repository, Session};
pub use error::{Error, ErrorKind, ErrorOrigin};

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

///
/// Prelude
/// using _ brings traits into scope and avoids name conflicts
///

pub mod prelude {
    pub use crate::{
        Database, DatabaseConfig, Error, ErrorKind, Repository, Session,
        core::{
            model::{EntityModel, FieldKind, FieldModel, IndexModel},
            query::{CompareOp, Filter, Page},
            registry::EntityRegistry,
            row::Row,
            session::SessionState,
            traits::EntityKind,
            value::{EntityId, Value},
        },
    };
    pub use serde::{Deserialize, Serialize};
}
