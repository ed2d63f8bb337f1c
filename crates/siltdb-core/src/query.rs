use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    model::EntityModel,
    row::Row,
    value::Value,
};
use std::cmp::Ordering;
use thiserror::Error as ThisError;

///
/// QueryError
///

#[derive(Debug, ThisError)]
pub enum QueryError {
    #[error("filter references unknown field '{field}' on entity '{entity}'")]
    UnknownFilterField { entity: String, field: String },

    #[error("filter literal for '{entity}.{field}' does not match the field kind")]
    FilterKindMismatch { entity: String, field: String },
}

impl From<QueryError> for InternalError {
    fn from(err: QueryError) -> Self {
        Self::new(ErrorClass::InvalidInput, ErrorOrigin::Query, err.to_string())
    }
}

///
/// PageError
///

#[derive(Debug, ThisError)]
pub enum PageError {
    #[error("page offset must not be negative, got {0}")]
    NegativeOffset(i64),

    #[error("page limit must not be negative, got {0}")]
    NegativeLimit(i64),
}

impl From<PageError> for InternalError {
    fn from(err: PageError) -> Self {
        Self::new(ErrorClass::InvalidInput, ErrorOrigin::Query, err.to_string())
    }
}

///
/// CompareOp
///
/// Operator subset evaluated directly against decoded row values.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    /// Evaluate the operator over a semantic comparison result.
    ///
    /// `None` (unordered: kind mismatch or Null) satisfies only `Ne`, so
    /// filters never match absent values by accident.
    #[must_use]
    pub const fn eval(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Self::Eq, Some(Ordering::Equal))
            | (Self::Ne, Some(Ordering::Less | Ordering::Greater) | None)
            | (Self::Lt, Some(Ordering::Less))
            | (Self::Lte, Some(Ordering::Less | Ordering::Equal))
            | (Self::Gt, Some(Ordering::Greater))
            | (Self::Gte, Some(Ordering::Greater | Ordering::Equal)) => true,
            _ => false,
        }
    }
}

///
/// Filter
///
/// Row predicate program: a conservative And/Or/Not/Compare tree evaluated
/// against decoded rows. `True` matches everything.
///

#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    True,
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
}

impl Filter {
    #[must_use]
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::cmp(field, CompareOp::Eq, value)
    }

    #[must_use]
    pub fn cmp(field: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value,
        }
    }

    #[must_use]
    pub fn and(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    #[must_use]
    pub fn or(filters: impl IntoIterator<Item = Self>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Check every compared field against the model before execution.
    pub fn validate(&self, model: &EntityModel) -> Result<(), QueryError> {
        match self {
            Self::True => Ok(()),
            Self::And(children) | Self::Or(children) => {
                children.iter().try_for_each(|child| child.validate(model))
            }
            Self::Not(child) => child.validate(model),
            Self::Compare { field, value, .. } => {
                let Some(field_model) = model.field(field) else {
                    return Err(QueryError::UnknownFilterField {
                        entity: model.name().to_string(),
                        field: field.clone(),
                    });
                };

                // Null literals are allowed against any field; they express
                // is-null / is-not-null via Eq / Ne.
                if !value.is_null() && !field_model.kind.matches(value) {
                    return Err(QueryError::FilterKindMismatch {
                        entity: model.name().to_string(),
                        field: field.clone(),
                    });
                }

                Ok(())
            }
        }
    }

    /// Evaluate this filter against one decoded row.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::True => true,
            Self::And(children) => children.iter().all(|child| child.matches(row)),
            Self::Or(children) => children.iter().any(|child| child.matches(row)),
            Self::Not(child) => !child.matches(row),
            Self::Compare { field, op, value } => {
                let actual = row.get(field).unwrap_or(&Value::Null);

                op.eval(actual.compare(value))
            }
        }
    }
}

///
/// Page
///
/// Validated offset/limit window. Inputs are signed so negative callers are
/// rejected with a typed error instead of silently wrapping.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Page {
    offset: u64,
    limit: u64,
}

impl Page {
    /// Validate and construct a page window.
    pub fn new(offset: i64, limit: i64) -> Result<Self, PageError> {
        if offset < 0 {
            return Err(PageError::NegativeOffset(offset));
        }
        if limit < 0 {
            return Err(PageError::NegativeLimit(limit));
        }

        #[allow(clippy::cast_sign_loss)]
        Ok(Self {
            offset: offset as u64,
            limit: limit as u64,
        })
    }

    /// The unbounded window.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            offset: 0,
            limit: u64::MAX,
        }
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    /// Apply the window to an ordered sequence.
    pub(crate) fn apply<T>(&self, items: impl Iterator<Item = T>) -> Vec<T> {
        items
            .skip(usize::try_from(self.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(self.limit).unwrap_or(usize::MAX))
            .collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::all()
    }
}
