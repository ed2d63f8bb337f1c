//! Commit plan and atomicity contract.
//!
//! Contract:
//! - A session compiles its pending operations into a `CommitPlan` that
//!   fully describes every mutation, version expectation, unique-index
//!   entry, and reference check.
//! - `StorageConnection::apply` validates the whole plan first and then
//!   mutates all-or-nothing; apply logic never re-derives semantics from
//!   entity contents.

use crate::{
    error::InternalError,
    model::EntityModel,
    row::Row,
    value::{EntityId, Value},
};

/// Stored primary-key bytes. Always the 16-byte id representation.
pub type RawKey = [u8; EntityId::STORED_SIZE];

/// Separator between composite index components. JSON component bytes never
/// contain raw control characters, so this cannot collide.
const INDEX_COMPONENT_SEPARATOR: u8 = 0x1F;

///
/// VersionExpectation
///
/// Optimistic-concurrency expectation recorded per plan op.
///
/// - `Absent`: the row must not exist (freshly generated identity).
/// - `Exactly(v)`: the row must still be at the version observed when this
///   session loaded it.
/// - `Any`: no expectation (upsert by caller-supplied identity, deletes).
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VersionExpectation {
    Absent,
    Any,
    Exactly(u64),
}

///
/// IndexEntry
///
/// One unique-index claim recorded in a commit plan. Carries the constraint
/// name plus canonical component bytes.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexEntry {
    pub index: String,
    pub value: Vec<u8>,
}

///
/// RefCheck
///
/// One reference (foreign-key) check recorded in a commit plan.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RefCheck {
    /// Constraint name reported on violation (e.g. `move_job.partner`).
    pub constraint: String,
    /// Target entity name.
    pub entity: String,
    /// Referenced primary key.
    pub key: RawKey,
}

///
/// CommitOp
///
/// Raw mutation recorded in a commit plan. Carries everything apply needs;
/// drivers must not branch on decoded row contents.
///

#[derive(Clone, Debug)]
pub enum CommitOp {
    Put {
        entity: String,
        key: RawKey,
        expected: VersionExpectation,
        bytes: Vec<u8>,
        index_entries: Vec<IndexEntry>,
        refs: Vec<RefCheck>,
    },
    Delete {
        entity: String,
        key: RawKey,
        expected: VersionExpectation,
    },
}

impl CommitOp {
    #[must_use]
    pub fn entity(&self) -> &str {
        match self {
            Self::Put { entity, .. } | Self::Delete { entity, .. } => entity,
        }
    }

    #[must_use]
    pub const fn key(&self) -> &RawKey {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

///
/// CommitPlan
///
/// Fully-specified mutation plan for one session commit. The plan id is a
/// fresh ULID used for log correlation.
///

#[derive(Clone, Debug)]
pub struct CommitPlan {
    pub id: EntityId,
    pub ops: Vec<CommitOp>,
}

impl CommitPlan {
    /// Construct a plan with a fresh commit id.
    pub fn new(ops: Vec<CommitOp>) -> Result<Self, InternalError> {
        let id = EntityId::generate()?;

        Ok(Self { id, ops })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Compile the unique-index entries for one row. Entries with a Null
/// component are skipped, so nullable unique fields admit repeated absence.
pub(crate) fn index_entries_for_row(
    model: &EntityModel,
    row: &Row,
) -> Result<Vec<IndexEntry>, InternalError> {
    let mut entries = Vec::with_capacity(model.indexes().len());

    'indexes: for index in model.indexes() {
        let mut value = Vec::new();

        for (position, field) in index.fields.iter().enumerate() {
            let component = row.get(field).unwrap_or(&Value::Null);
            if component.is_null() {
                continue 'indexes;
            }

            if position > 0 {
                value.push(INDEX_COMPONENT_SEPARATOR);
            }
            value.extend_from_slice(&component.index_bytes()?);
        }

        entries.push(IndexEntry {
            index: index.name.clone(),
            value,
        });
    }

    Ok(entries)
}

/// Compile the reference checks for one row. Null references are skipped.
pub(crate) fn ref_checks_for_row(model: &EntityModel, row: &Row) -> Vec<RefCheck> {
    model
        .references()
        .filter_map(|(field, target)| {
            let value = row.get(field)?;
            let id = value.as_ulid()?;

            Some(RefCheck {
                constraint: format!("{}.{field}", model.name()),
                entity: target.to_string(),
                key: id.to_bytes(),
            })
        })
        .collect()
}
