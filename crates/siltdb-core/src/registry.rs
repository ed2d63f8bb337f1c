use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    model::EntityModel,
};
use std::{collections::BTreeMap, sync::Arc};
use thiserror::Error as ThisError;

///
/// RegistryError
///

#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("entity '{0}' already registered")]
    DuplicateEntity(String),

    #[error("entity '{0}' not registered")]
    UnknownEntity(String),

    #[error("entity '{entity}' field '{field}' references unregistered entity '{target}'")]
    UnresolvedReference {
        entity: String,
        field: String,
        target: String,
    },
}

impl RegistryError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::DuplicateEntity(_) => ErrorClass::Duplicate,
            Self::UnknownEntity(_) => ErrorClass::NotFound,
            Self::UnresolvedReference { .. } => ErrorClass::InvalidInput,
        }
    }
}

impl From<RegistryError> for InternalError {
    fn from(err: RegistryError) -> Self {
        Self::new(err.class(), ErrorOrigin::Registry, err.to_string())
    }
}

///
/// EntityRegistry
///
/// Single source of truth mapping entity names to their models. Populated
/// by explicit, ordered `register` calls during process initialization and
/// read-only afterwards; registration failures are fatal at startup, there
/// is no partial-registry mode.
///

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: BTreeMap<String, Arc<EntityModel>>,
}

impl EntityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entities: BTreeMap::new(),
        }
    }

    /// Register an entity model under its declared name.
    pub fn register(&mut self, model: EntityModel) -> Result<(), InternalError> {
        let name = model.name().to_string();

        if self.entities.contains_key(&name) {
            return Err(RegistryError::DuplicateEntity(name).into());
        }

        log::debug!(
            "registered entity '{name}' ({} fields, {} indexes)",
            model.fields().len(),
            model.indexes().len()
        );
        self.entities.insert(name, Arc::new(model));

        Ok(())
    }

    /// Look up a model by entity name.
    pub fn resolve(&self, name: &str) -> Result<Arc<EntityModel>, InternalError> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownEntity(name.to_string()).into())
    }

    /// Iterate all registered models. Restartable; call again for a fresh
    /// pass.
    pub fn all(&self) -> impl Iterator<Item = &EntityModel> {
        self.entities.values().map(Arc::as_ref)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Check that every declared reference points at a registered entity.
    /// Called once the registration phase is complete; a failure here aborts
    /// initialization.
    pub fn finalize(&self) -> Result<(), InternalError> {
        for model in self.all() {
            for (field, target) in model.references() {
                if !self.entities.contains_key(target) {
                    return Err(RegistryError::UnresolvedReference {
                        entity: model.name().to_string(),
                        field: field.to_string(),
                        target: target.to_string(),
                    }
                    .into());
                }
            }
        }

        log::info!("entity registry finalized with {} entities", self.len());
        Ok(())
    }
}
