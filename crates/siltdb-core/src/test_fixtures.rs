//! Shared fixtures for unit tests: a two-entity moving-company schema and
//! a ready-made manager over the in-memory driver.

use crate::{
    error::InternalError,
    model::{EntityModel, FieldKind, FieldModel, IndexModel},
    registry::EntityRegistry,
    row::Row,
    session::SessionManager,
    store::{ConnectionPool, MemoryDriver},
    traits::EntityKind,
    value::{EntityId, Value},
};
use std::{sync::Arc, time::Duration};

pub fn partner_model() -> EntityModel {
    EntityModel::new(
        "partner",
        "id",
        vec![
            FieldModel::new("id", FieldKind::Ulid),
            FieldModel::new("name", FieldKind::Text),
            FieldModel::new("email", FieldKind::Text).nullable(),
            FieldModel::new("rating", FieldKind::Int),
        ],
        vec![IndexModel::unique("partner.email", &["email"])],
    )
    .expect("partner model should construct")
}

pub fn move_job_model() -> EntityModel {
    EntityModel::new(
        "move_job",
        "id",
        vec![
            FieldModel::new("id", FieldKind::Ulid),
            FieldModel::new(
                "partner",
                FieldKind::Ref {
                    entity: "partner".to_string(),
                },
            )
            .nullable(),
            FieldModel::new("move_date", FieldKind::Timestamp),
            FieldModel::new("notes", FieldKind::Text).nullable(),
        ],
        vec![],
    )
    .expect("move_job model should construct")
}

pub fn test_registry() -> EntityRegistry {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut registry = EntityRegistry::new();
    registry
        .register(partner_model())
        .expect("partner registration should succeed");
    registry
        .register(move_job_model())
        .expect("move_job registration should succeed");
    registry
        .finalize()
        .expect("fixture registry should finalize");

    registry
}

pub fn test_manager() -> SessionManager {
    let registry = Arc::new(test_registry());
    let driver = MemoryDriver::new(&registry);
    let pool = ConnectionPool::new(driver, 4, Duration::from_millis(200))
        .expect("fixture pool should construct");

    SessionManager::new(registry, Arc::new(pool))
}

pub fn partner_row(id: EntityId, name: &str) -> Row {
    Row::new()
        .with("id", Value::Ulid(id))
        .with("name", Value::Text(name.to_string()))
        .with("email", Value::Null)
        .with("rating", Value::Int(3))
}

///
/// Partner
///

#[derive(Clone, Debug, PartialEq)]
pub struct Partner {
    pub id: Option<EntityId>,
    pub name: String,
    pub email: Option<String>,
    pub rating: i64,
}

impl EntityKind for Partner {
    const ENTITY: &'static str = "partner";

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", Value::Ulid(self.id.unwrap_or_else(EntityId::nil)))
            .with("name", Value::Text(self.name.clone()))
            .with(
                "email",
                self.email.clone().map_or(Value::Null, Value::Text),
            )
            .with("rating", Value::Int(self.rating))
    }

    fn from_row(row: &Row) -> Result<Self, InternalError> {
        Ok(Self {
            id: row.id("id"),
            name: row
                .try_get("name")?
                .as_text()
                .unwrap_or_default()
                .to_string(),
            email: row.get("email").and_then(|v| v.as_text()).map(String::from),
            rating: row.try_get("rating")?.as_int().unwrap_or_default(),
        })
    }
}

///
/// MoveJob
///

#[derive(Clone, Debug, PartialEq)]
pub struct MoveJob {
    pub id: Option<EntityId>,
    pub partner: Option<EntityId>,
    pub move_date: i64,
    pub notes: Option<String>,
}

impl EntityKind for MoveJob {
    const ENTITY: &'static str = "move_job";

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("id", Value::Ulid(self.id.unwrap_or_else(EntityId::nil)))
            .with("partner", self.partner.map_or(Value::Null, Value::Ulid))
            .with("move_date", Value::Timestamp(self.move_date))
            .with("notes", self.notes.clone().map_or(Value::Null, Value::Text))
    }

    fn from_row(row: &Row) -> Result<Self, InternalError> {
        Ok(Self {
            id: row.id("id"),
            partner: row.get("partner").and_then(crate::value::Value::as_ulid),
            move_date: row.try_get("move_date")?.as_timestamp().unwrap_or_default(),
            notes: row.get("notes").and_then(|v| v.as_text()).map(String::from),
        })
    }
}
