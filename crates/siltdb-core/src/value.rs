use crate::error::{ErrorClass, ErrorOrigin, InternalError};
use derive_more::Deref;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use std::{
    cmp::Ordering,
    fmt,
    str::FromStr,
    sync::{LazyLock, Mutex},
};
use ulid::Ulid;

///
/// GENERATOR
///
/// Global monotonic ULID generator. Keeping state guarantees that ids
/// assigned within the same millisecond still sort in assignment order.
///

static GENERATOR: LazyLock<Mutex<ulid::Generator>> =
    LazyLock::new(|| Mutex::new(ulid::Generator::new()));

///
/// EntityId
///
/// Typed identity for persistent entities. The stored representation is a
/// 16-byte ULID; the wire representation is its canonical 26-char string.
///

#[derive(Clone, Copy, Debug, Deref, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[repr(transparent)]
pub struct EntityId(Ulid);

impl EntityId {
    pub const STORED_SIZE: usize = 16;

    #[must_use]
    pub const fn nil() -> Self {
        Self(Ulid::nil())
    }

    /// Generate a fresh id from the global monotonic generator.
    pub fn generate() -> Result<Self, InternalError> {
        let mut generator = GENERATOR.lock().map_err(|_| {
            InternalError::new(
                ErrorClass::Internal,
                ErrorOrigin::Serialize,
                "id generator mutex poisoned",
            )
        })?;

        let ulid = generator.generate().map_err(|_| {
            InternalError::new(
                ErrorClass::Internal,
                ErrorOrigin::Serialize,
                "monotonic id overflow within one millisecond",
            )
        })?;

        Ok(Self(ulid))
    }

    #[must_use]
    pub const fn from_parts(timestamp_ms: u64, random: u128) -> Self {
        Self(Ulid::from_parts(timestamp_ms, random))
    }

    #[must_use]
    pub const fn to_bytes(self) -> [u8; Self::STORED_SIZE] {
        self.0.to_bytes()
    }

    #[must_use]
    pub const fn from_bytes(bytes: [u8; Self::STORED_SIZE]) -> Self {
        Self(Ulid::from_bytes(bytes))
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

// Ids serialize as their canonical string so the JSON row encoding stays
// readable and diffable.
impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;

        text.parse()
            .map_err(|err| D::Error::custom(format!("invalid entity id: {err}")))
    }
}

///
/// Value
///
/// Scalar field value, aligned with `FieldKind`.
///
/// Null → the field's value is absent (nullable fields only).
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float64(f64),
    Text(String),
    /// Milliseconds since the Unix epoch.
    Timestamp(i64),
    Ulid(EntityId),
    Blob(Vec<u8>),
    Null,
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_float64(&self) -> Option<f64> {
        match self {
            Self::Float64(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_timestamp(&self) -> Option<i64> {
        match self {
            Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_ulid(&self) -> Option<EntityId> {
        match self {
            Self::Ulid(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    /// Semantic comparison between same-kind values.
    ///
    /// Returns `None` for kind mismatches and for kinds without a defined
    /// order (Blob). Null compares equal only to Null and is otherwise
    /// unordered, so predicates never match absent values by accident.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Uint(a), Self::Uint(b)) => Some(a.cmp(b)),
            (Self::Float64(a), Self::Float64(b)) => Some(a.total_cmp(b)),
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Ulid(a), Self::Ulid(b)) => Some(a.cmp(b)),
            (Self::Null, Self::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Canonical bytes used as unique-index components.
    ///
    /// Uses the JSON wire form; canonical because every variant has exactly
    /// one JSON rendering here. Non-finite floats would all render as JSON
    /// null, so row validation rejects them before they reach an index.
    pub(crate) fn index_bytes(&self) -> Result<Vec<u8>, InternalError> {
        serde_json::to_vec(self).map_err(|err| {
            InternalError::serialize_internal(format!("failed to encode index component: {err}"))
        })
    }
}
