use crate::value::Value;
use std::fmt;

///
/// FieldKind
///
/// Runtime type shape for one entity field, aligned with `Value` variants.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldKind {
    Bool,
    Int,
    Uint,
    Float64,
    Text,
    Timestamp,
    Ulid,
    Blob,

    /// Reference to another entity's primary key.
    /// Enforced at commit time as a foreign-key constraint.
    Ref { entity: String },
}

impl FieldKind {
    /// Reference to a named entity.
    #[must_use]
    pub fn reference(entity: impl Into<String>) -> Self {
        Self::Ref {
            entity: entity.into(),
        }
    }

    /// True if `value` inhabits this kind. Null is handled by nullability,
    /// not here.
    #[must_use]
    pub fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Bool, Value::Bool(_))
                | (Self::Int, Value::Int(_))
                | (Self::Uint, Value::Uint(_))
                | (Self::Float64, Value::Float64(_))
                | (Self::Text, Value::Text(_))
                | (Self::Timestamp, Value::Timestamp(_))
                | (Self::Ulid | Self::Ref { .. }, Value::Ulid(_))
                | (Self::Blob, Value::Blob(_))
        )
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Uint => write!(f, "uint"),
            Self::Float64 => write!(f, "float64"),
            Self::Text => write!(f, "text"),
            Self::Timestamp => write!(f, "timestamp"),
            Self::Ulid => write!(f, "ulid"),
            Self::Blob => write!(f, "blob"),
            Self::Ref { entity } => write!(f, "ref<{entity}>"),
        }
    }
}

///
/// FieldModel
/// Runtime field metadata used by validation and predicate planning.
///

#[derive(Clone, Debug)]
pub struct FieldModel {
    /// Field name as used in rows, predicates, and indexes.
    pub name: String,
    /// Runtime type shape.
    pub kind: FieldKind,
    /// Whether the stored value may be Null.
    pub nullable: bool,
}

impl FieldModel {
    /// A required (non-nullable) field.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    /// Mark this field nullable.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}
