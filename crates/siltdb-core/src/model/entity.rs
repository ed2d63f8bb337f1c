use crate::{
    MAX_INDEX_FIELDS,
    error::{ErrorClass, ErrorOrigin, InternalError},
    model::{
        field::{FieldKind, FieldModel},
        index::IndexModel,
    },
    row::Row,
    value::Value,
};
use std::collections::BTreeSet;
use thiserror::Error as ThisError;

///
/// ModelError
///
/// Rejected entity-model shapes. All of these are startup-time faults; a
/// model that constructs successfully is structurally sound for the rest of
/// the process lifetime.
///

#[derive(Debug, ThisError)]
pub enum ModelError {
    #[error("entity '{entity}' declares no fields")]
    NoFields { entity: String },

    #[error("entity '{entity}' declares field '{field}' more than once")]
    DuplicateField { entity: String, field: String },

    #[error("entity '{entity}' primary key '{field}' is not a declared field")]
    UnknownPrimaryKey { entity: String, field: String },

    #[error("entity '{entity}' primary key '{field}' must be an id field, found {kind}")]
    NonIdPrimaryKey {
        entity: String,
        field: String,
        kind: FieldKind,
    },

    #[error("entity '{entity}' primary key '{field}' must not be nullable")]
    NullablePrimaryKey { entity: String, field: String },

    #[error("entity '{entity}' declares index '{index}' more than once")]
    DuplicateIndex { entity: String, index: String },

    #[error("entity '{entity}' index '{index}' has no fields")]
    EmptyIndex { entity: String, index: String },

    #[error("entity '{entity}' index '{index}' exceeds {MAX_INDEX_FIELDS} fields")]
    OversizedIndex { entity: String, index: String },

    #[error("entity '{entity}' index '{index}' references unknown field '{field}'")]
    UnknownIndexField {
        entity: String,
        index: String,
        field: String,
    },
}

impl From<ModelError> for InternalError {
    fn from(err: ModelError) -> Self {
        Self::new(ErrorClass::InvalidInput, ErrorOrigin::Registry, err.to_string())
    }
}

///
/// RowError
///
/// Row-shape violations detected when a row is validated against its model
/// before staging a save.
///

#[derive(Debug, ThisError)]
pub enum RowError {
    #[error("row for '{entity}' is missing field '{field}'")]
    MissingField { entity: String, field: String },

    #[error("row for '{entity}' carries undeclared field '{field}'")]
    UnknownField { entity: String, field: String },

    #[error("row for '{entity}' field '{field}' is not a {kind} value")]
    KindMismatch {
        entity: String,
        field: String,
        kind: FieldKind,
    },

    #[error("row for '{entity}' field '{field}' is null but not nullable")]
    UnexpectedNull { entity: String, field: String },

    #[error("row for '{entity}' field '{field}' must be a finite float")]
    NonFiniteFloat { entity: String, field: String },
}

impl From<RowError> for InternalError {
    fn from(err: RowError) -> Self {
        Self::new(
            ErrorClass::InvalidInput,
            ErrorOrigin::Repository,
            err.to_string(),
        )
    }
}

///
/// EntityModel
///
/// Runtime descriptor for one persistable entity: stable name, primary key,
/// ordered field list, and uniqueness constraints. Built explicitly at
/// startup through the checked constructor; immutable afterwards.
///

#[derive(Clone, Debug)]
pub struct EntityModel {
    name: String,
    primary_key: String,
    fields: Vec<FieldModel>,
    indexes: Vec<IndexModel>,
}

impl EntityModel {
    /// Construct and structurally validate a model.
    pub fn new(
        name: impl Into<String>,
        primary_key: impl Into<String>,
        fields: Vec<FieldModel>,
        indexes: Vec<IndexModel>,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        let primary_key = primary_key.into();

        if fields.is_empty() {
            return Err(ModelError::NoFields { entity: name });
        }

        let mut seen = BTreeSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ModelError::DuplicateField {
                    entity: name,
                    field: field.name.clone(),
                });
            }
        }

        let Some(pk) = fields.iter().find(|f| f.name == primary_key) else {
            return Err(ModelError::UnknownPrimaryKey {
                entity: name,
                field: primary_key,
            });
        };
        if pk.kind != FieldKind::Ulid {
            return Err(ModelError::NonIdPrimaryKey {
                entity: name,
                field: primary_key.clone(),
                kind: pk.kind.clone(),
            });
        }
        if pk.nullable {
            return Err(ModelError::NullablePrimaryKey {
                entity: name,
                field: primary_key,
            });
        }

        let mut index_names = BTreeSet::new();
        for index in &indexes {
            if !index_names.insert(index.name.as_str()) {
                return Err(ModelError::DuplicateIndex {
                    entity: name,
                    index: index.name.clone(),
                });
            }
            if index.fields.is_empty() {
                return Err(ModelError::EmptyIndex {
                    entity: name,
                    index: index.name.clone(),
                });
            }
            if index.fields.len() > MAX_INDEX_FIELDS {
                return Err(ModelError::OversizedIndex {
                    entity: name,
                    index: index.name.clone(),
                });
            }
            for field in &index.fields {
                if !seen.contains(field.as_str()) {
                    return Err(ModelError::UnknownIndexField {
                        entity: name,
                        index: index.name.clone(),
                        field: field.clone(),
                    });
                }
            }
        }

        Ok(Self {
            name,
            primary_key,
            fields,
            indexes,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldModel] {
        &self.fields
    }

    #[must_use]
    pub fn indexes(&self) -> &[IndexModel] {
        &self.indexes
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldModel> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Reference fields as (field name, target entity) pairs.
    pub fn references(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().filter_map(|f| match &f.kind {
            FieldKind::Ref { entity } => Some((f.name.as_str(), entity.as_str())),
            _ => None,
        })
    }

    /// Validate a row against this model: every declared field present, no
    /// undeclared fields, kinds match, Null only where nullable.
    pub fn validate_row(&self, row: &Row) -> Result<(), RowError> {
        for field in &self.fields {
            let Some(value) = row.get(&field.name) else {
                return Err(RowError::MissingField {
                    entity: self.name.clone(),
                    field: field.name.clone(),
                });
            };

            if value.is_null() {
                if !field.nullable {
                    return Err(RowError::UnexpectedNull {
                        entity: self.name.clone(),
                        field: field.name.clone(),
                    });
                }
            } else if !field.kind.matches(value) {
                return Err(RowError::KindMismatch {
                    entity: self.name.clone(),
                    field: field.name.clone(),
                    kind: field.kind.clone(),
                });
            } else if let Value::Float64(float) = value
                && !float.is_finite()
            {
                // NaN and the infinities have no canonical index encoding.
                return Err(RowError::NonFiniteFloat {
                    entity: self.name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        for (name, _) in row.iter() {
            if self.field(name).is_none() {
                return Err(RowError::UnknownField {
                    entity: self.name.clone(),
                    field: name.to_string(),
                });
            }
        }

        Ok(())
    }
}
