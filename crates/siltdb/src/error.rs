use derive_more::Display;
use serde::{Deserialize, Serialize};
use siltdb_core::error::{
    ErrorClass, ErrorDetail, ErrorOrigin as CoreErrorOrigin, InternalError,
};
use thiserror::Error as ThisError;

///
/// Error
/// Public error type with a stable kind + origin taxonomy.
///

#[derive(Debug, Deserialize, Serialize, ThisError)]
#[error("{message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, ErrorOrigin::Config, message)
    }
}

impl From<InternalError> for Error {
    fn from(err: InternalError) -> Self {
        let origin = err.origin.into();
        let kind = match (err.class, err.origin) {
            (ErrorClass::Duplicate, _) => ErrorKind::DuplicateEntity,
            (ErrorClass::NotFound, CoreErrorOrigin::Registry) => ErrorKind::UnknownEntity,
            (ErrorClass::InvalidInput, CoreErrorOrigin::Query) => ErrorKind::InvalidPagination,
            (ErrorClass::Constraint, _) => {
                let constraint = match &err.detail {
                    Some(ErrorDetail::Constraint { name }) => Some(name.clone()),
                    _ => None,
                };

                ErrorKind::ConstraintViolation { constraint }
            }
            (ErrorClass::Conflict, _) => ErrorKind::OptimisticLock,
            (ErrorClass::Unavailable, CoreErrorOrigin::Session) => ErrorKind::SessionUnavailable,
            (ErrorClass::Closed, _) => ErrorKind::SessionClosed,
            (ErrorClass::Io, _) => ErrorKind::PersistenceIo,
            _ => ErrorKind::Internal,
        };

        Self::new(kind, origin, err.message)
    }
}

///
/// ErrorKind
/// Public error taxonomy for callers.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorKind {
    /// Two registrations claimed the same entity name. Startup fault.
    DuplicateEntity,

    /// An entity name was never registered. Startup fault.
    UnknownEntity,

    /// Negative offset or limit in a page request.
    InvalidPagination,

    /// A declared unique index or reference was violated at commit.
    ConstraintViolation { constraint: Option<String> },

    /// A commit-time version check failed; reload and retry the work.
    OptimisticLock,

    /// A repository was called outside a session scope.
    SessionUnavailable,

    /// The session already committed or rolled back.
    SessionClosed,

    /// Storage I/O failure, including pool acquire timeouts. Retryable.
    PersistenceIo,

    /// Configuration could not be parsed or validated.
    Config,

    /// The caller cannot remediate this.
    Internal,
}

///
/// ErrorOrigin
/// Public origin taxonomy for callers.
///

#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
pub enum ErrorOrigin {
    Registry,
    Session,
    Repository,
    Store,
    Query,
    Serialize,
    Config,
}

impl From<CoreErrorOrigin> for ErrorOrigin {
    fn from(origin: CoreErrorOrigin) -> Self {
        match origin {
            CoreErrorOrigin::Registry => Self::Registry,
            CoreErrorOrigin::Session => Self::Session,
            CoreErrorOrigin::Repository => Self::Repository,
            CoreErrorOrigin::Store => Self::Store,
            CoreErrorOrigin::Query => Self::Query,
            CoreErrorOrigin::Serialize => Self::Serialize,
        }
    }
}
