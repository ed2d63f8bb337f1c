use std::fmt;
use thiserror::Error as ThisError;

///
/// InternalError
///
/// Structured runtime error with a stable internal classification.
/// Not a stable API; the facade crate maps this onto the public taxonomy.
///

#[derive(Debug, ThisError)]
#[error("{message}")]
pub struct InternalError {
    pub class: ErrorClass,
    pub origin: ErrorOrigin,
    pub message: String,

    /// Optional structured error detail.
    /// The variant (if present) must correspond to `class`.
    pub detail: Option<ErrorDetail>,
}

impl InternalError {
    /// Construct an InternalError with no structured detail.
    pub fn new(class: ErrorClass, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            class,
            origin,
            message: message.into(),
            detail: None,
        }
    }

    /// Attach structured detail to an error.
    #[must_use]
    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Construct a session-origin unavailable error.
    pub(crate) fn session_unavailable() -> Self {
        Self::new(
            ErrorClass::Unavailable,
            ErrorOrigin::Session,
            "no active session on this thread; repository operations require a session scope",
        )
    }

    /// Construct a session-origin closed error for a given terminal state.
    pub(crate) fn session_closed(state: impl fmt::Display) -> Self {
        Self::new(
            ErrorClass::Closed,
            ErrorOrigin::Session,
            format!("session is {state}; no further operations are possible"),
        )
    }

    /// Construct a store-origin I/O error.
    pub(crate) fn store_io(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Io, ErrorOrigin::Store, message.into())
    }

    /// Construct a store-origin internal error.
    pub(crate) fn store_internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Store, message.into())
    }

    /// Construct a serialize-origin internal error.
    pub(crate) fn serialize_internal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Internal, ErrorOrigin::Serialize, message.into())
    }

    /// Construct a session-origin invariant violation.
    pub(crate) fn session_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Session,
            message.into(),
        )
    }

    /// Construct a repository-origin invariant violation.
    pub(crate) fn repository_invariant(message: impl Into<String>) -> Self {
        Self::new(
            ErrorClass::InvariantViolation,
            ErrorOrigin::Repository,
            message.into(),
        )
    }

    /// Construct a version-conflict error for one row.
    pub(crate) fn version_conflict(
        entity: &str,
        key: impl fmt::Display,
        expected: u64,
        found: Option<u64>,
    ) -> Self {
        let message = match found {
            Some(found) => format!(
                "optimistic lock failure on {entity}/{key}: expected version {expected}, found {found}"
            ),
            None => format!(
                "optimistic lock failure on {entity}/{key}: expected version {expected}, row is gone"
            ),
        };

        Self::new(ErrorClass::Conflict, ErrorOrigin::Store, message).with_detail(
            ErrorDetail::Conflict {
                entity: entity.to_string(),
                key: key.to_string(),
                expected,
                found,
            },
        )
    }

    /// Construct a constraint-violation error carrying the constraint name.
    pub(crate) fn constraint_violation(constraint: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Constraint, ErrorOrigin::Store, message.into()).with_detail(
            ErrorDetail::Constraint {
                name: constraint.to_string(),
            },
        )
    }

    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self.class, ErrorClass::Conflict)
    }

    #[must_use]
    pub const fn is_constraint(&self) -> bool {
        matches!(self.class, ErrorClass::Constraint)
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}:{}: {}", self.origin, self.class, self.message)
    }
}

///
/// ErrorDetail
///
/// Structured, class-specific error detail carried by [`InternalError`].
/// This enum is intentionally extensible.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ErrorDetail {
    /// A commit-time version check failed for one row.
    Conflict {
        entity: String,
        key: String,
        expected: u64,
        found: Option<u64>,
    },

    /// A declared constraint (unique index or reference) was violated.
    Constraint { name: String },
}

///
/// ErrorClass
/// Internal error taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    NotFound,
    Duplicate,
    Constraint,
    Conflict,
    InvalidInput,
    Unavailable,
    Closed,
    Io,
    Internal,
    InvariantViolation,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NotFound => "not_found",
            Self::Duplicate => "duplicate",
            Self::Constraint => "constraint",
            Self::Conflict => "conflict",
            Self::InvalidInput => "invalid_input",
            Self::Unavailable => "unavailable",
            Self::Closed => "closed",
            Self::Io => "io",
            Self::Internal => "internal",
            Self::InvariantViolation => "invariant_violation",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
/// Internal origin taxonomy for runtime classification.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Registry,
    Session,
    Repository,
    Store,
    Query,
    Serialize,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Registry => "registry",
            Self::Session => "session",
            Self::Repository => "repository",
            Self::Store => "store",
            Self::Query => "query",
            Self::Serialize => "serialize",
        };
        write!(f, "{label}")
    }
}
