use crate::{
    error::InternalError,
    model::EntityModel,
    query::{Filter, Page},
    session::SessionManager,
    traits::EntityKind,
    value::EntityId,
};
use std::{marker::PhantomData, sync::Arc};

///
/// Repository
///
/// Stateless persistence facade bound to one entity type. Holds no entity
/// data, only the session manager and the resolved model; every operation
/// runs against the session active on the calling thread.
///

pub struct Repository<E: EntityKind> {
    manager: SessionManager,
    model: Arc<EntityModel>,
    _marker: PhantomData<E>,
}

impl<E: EntityKind> Repository<E> {
    /// Bind a repository to its registered entity model. Fails when the
    /// entity was never registered, which is a startup fault.
    pub fn new(manager: &SessionManager) -> Result<Self, InternalError> {
        let model = manager.registry().resolve(E::ENTITY)?;

        Ok(Self {
            manager: manager.clone(),
            model,
            _marker: PhantomData,
        })
    }

    #[must_use]
    pub fn model(&self) -> &EntityModel {
        &self.model
    }

    /// Fetch one entity by id, observing the session's own staged changes.
    pub fn find_by_id(&self, id: EntityId) -> Result<Option<E>, InternalError> {
        let core = self.manager.current_core()?;
        let row = core.borrow_mut().load(&self.model, id)?;

        row.as_ref().map(E::from_row).transpose()
    }

    /// Fetch all matching entities in primary-key order, windowed by the
    /// page. The filter is validated against the model before execution.
    pub fn find_all(&self, filter: &Filter, page: Page) -> Result<Vec<E>, InternalError> {
        filter.validate(&self.model)?;

        let core = self.manager.current_core()?;
        let rows = core.borrow_mut().scan(&self.model)?;

        page.apply(rows.iter().filter(|row| filter.matches(row)))
            .into_iter()
            .map(E::from_row)
            .collect()
    }

    /// Count matching entities without paging.
    pub fn count(&self, filter: &Filter) -> Result<u64, InternalError> {
        filter.validate(&self.model)?;

        let core = self.manager.current_core()?;
        let rows = core.borrow_mut().scan(&self.model)?;

        Ok(rows.iter().filter(|row| filter.matches(row)).count() as u64)
    }

    /// Stage a save and return the persistent entity. Transient entities
    /// receive a generated id; the returned value carries it.
    pub fn save(&self, entity: E) -> Result<E, InternalError> {
        let (entity, id, fresh) = match entity.id() {
            Some(id) => (entity, id, false),
            None => {
                let id = EntityId::generate()?;

                (entity.with_id(id), id, true)
            }
        };

        let row = entity.to_row();
        self.model.validate_row(&row).map_err(InternalError::from)?;

        // The row's primary key must agree with the entity's identity.
        if row.id(self.model.primary_key()) != Some(id) {
            return Err(InternalError::repository_invariant(format!(
                "row primary key disagrees with entity identity for '{}'",
                self.model.name()
            )));
        }

        let core = self.manager.current_core()?;
        core.borrow_mut().stage_save(&self.model, id, row, fresh)?;

        Ok(entity)
    }

    /// Stage a delete by id. Deleting an absent entity is a no-op.
    pub fn delete(&self, id: EntityId) -> Result<(), InternalError> {
        let core = self.manager.current_core()?;
        let mut core = core.borrow_mut();
        // Deletion ends tracking before the delete is staged.
        core.detach(self.model.name(), id);
        core.stage_delete(&self.model, id)?;

        Ok(())
    }
}
