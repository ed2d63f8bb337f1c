use crate::{config::DatabaseConfig, error::Error};
use siltdb_core::{
    query::{Filter, Page},
    registry::EntityRegistry,
    repository,
    session,
    store::{ConnectionPool, MemoryDriver},
    traits::EntityKind,
    value::EntityId,
};
use std::{fmt, sync::Arc};

///
/// Database
///
/// Application entry point: owns the finalized registry, the storage
/// backend, and the connection pool, and hands out repositories and
/// session scopes. Construction is explicit; there is no container or
/// global instance.
///

pub struct Database {
    manager: session::SessionManager,
    pool: Arc<ConnectionPool>,
}

impl Database {
    /// Open a database over a finalizable registry. Registration faults
    /// and unresolved references are fatal here, before any repository
    /// exists.
    pub fn open(config: &DatabaseConfig, registry: EntityRegistry) -> Result<Self, Error> {
        config.validate()?;
        registry.finalize()?;

        let registry = Arc::new(registry);
        let driver = match config.scheme() {
            Some("memory") => MemoryDriver::new(&registry),
            Some(other) => {
                return Err(Error::config(format!(
                    "unsupported storage scheme '{other}'"
                )));
            }
            None => return Err(Error::config("storage url has no scheme")),
        };

        let pool = Arc::new(ConnectionPool::new(
            driver,
            config.pool.max_connections,
            config.pool.acquire_timeout(),
        )?);
        let manager = session::SessionManager::new(Arc::clone(&registry), Arc::clone(&pool));

        log::info!(
            "database open: {} entities, pool of {}",
            registry.len(),
            config.pool.max_connections
        );

        Ok(Self { manager, pool })
    }

    /// Open with defaults: in-memory storage, default pool.
    pub fn open_in_memory(registry: EntityRegistry) -> Result<Self, Error> {
        Self::open(&DatabaseConfig::default(), registry)
    }

    /// Bind a repository for one registered entity type.
    pub fn repository<E: EntityKind>(&self) -> Result<Repository<E>, Error> {
        Ok(Repository {
            inner: repository::Repository::new(&self.manager)?,
        })
    }

    /// Run `work` inside a session scope on this thread. Commits on Ok,
    /// rolls back on Err or panic; nested calls join the outer session.
    pub fn with_session<T>(&self, work: impl FnOnce() -> Result<T, Error>) -> Result<T, Error> {
        self.manager.with_session(work)
    }

    /// Open an explicit session handle for callers that need to decide
    /// commit versus rollback themselves.
    pub fn begin(&self) -> Result<Session, Error> {
        Ok(Session {
            inner: self.manager.begin()?,
        })
    }

    /// Close the pool. Sessions in flight finish; new ones fail with a
    /// persistence error.
    pub fn close(&self) {
        self.pool.close();
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

///
/// Session
///
/// Explicit unit-of-work handle. Dropping it unfinished rolls back.
///

pub struct Session {
    inner: session::Session,
}

impl Session {
    #[must_use]
    pub fn state(&self) -> session::SessionState {
        self.inner.state()
    }

    pub fn commit(&mut self) -> Result<(), Error> {
        self.inner.commit().map_err(Error::from)
    }

    pub fn rollback(&mut self) -> Result<(), Error> {
        self.inner.rollback().map_err(Error::from)
    }
}

///
/// Repository
///
/// Stateless facade bound to one entity type. Operations require a
/// session scope on the calling thread and surface the public error
/// taxonomy.
///

pub struct Repository<E: EntityKind> {
    inner: repository::Repository<E>,
}

impl<E: EntityKind> Repository<E> {
    pub fn find_by_id(&self, id: EntityId) -> Result<Option<E>, Error> {
        self.inner.find_by_id(id).map_err(Error::from)
    }

    pub fn find_all(&self, filter: &Filter, page: Page) -> Result<Vec<E>, Error> {
        self.inner.find_all(filter, page).map_err(Error::from)
    }

    pub fn count(&self, filter: &Filter) -> Result<u64, Error> {
        self.inner.count(filter).map_err(Error::from)
    }

    pub fn save(&self, entity: E) -> Result<E, Error> {
        self.inner.save(entity).map_err(Error::from)
    }

    pub fn delete(&self, id: EntityId) -> Result<(), Error> {
        self.inner.delete(id).map_err(Error::from)
    }
}
