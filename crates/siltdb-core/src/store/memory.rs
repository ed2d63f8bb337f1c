use crate::{
    error::InternalError,
    registry::EntityRegistry,
    session::commit::{CommitOp, CommitPlan, RawKey, VersionExpectation},
    store::{StorageConnection, StorageDriver, StoredRow},
    value::EntityId,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

///
/// StoredEntry
///
/// Row payload plus the unique-index entries it currently owns. Keeping the
/// owned entries alongside the row lets delete/overwrite release them
/// mechanically, without decoding the payload.
///

#[derive(Clone, Debug)]
struct StoredEntry {
    version: u64,
    bytes: Vec<u8>,
    index_entries: Vec<(String, Vec<u8>)>,
}

///
/// Table
///
/// Rows in primary-key order plus one value→key map per unique index.
///

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<RawKey, StoredEntry>,
    unique: BTreeMap<String, BTreeMap<Vec<u8>, RawKey>>,
}

///
/// MemoryStore
///
/// Whole-store state behind the driver's RwLock. `apply` runs under the
/// write lock, which is what makes plan application atomic across
/// concurrent sessions.
///

#[derive(Debug, Default)]
struct MemoryStore {
    tables: BTreeMap<String, Table>,
}

impl MemoryStore {
    fn table(&self, entity: &str) -> Result<&Table, InternalError> {
        self.tables
            .get(entity)
            .ok_or_else(|| InternalError::store_internal(format!("no table for entity '{entity}'")))
    }

    fn table_mut(&mut self, entity: &str) -> Result<&mut Table, InternalError> {
        self.tables
            .get_mut(entity)
            .ok_or_else(|| InternalError::store_internal(format!("no table for entity '{entity}'")))
    }

    /// Validation pass: reject the whole plan before any mutation.
    fn validate_plan(&self, plan: &CommitPlan) -> Result<(), InternalError> {
        // Keys whose current index entries are released by this plan
        // (overwritten rows re-claim below; deleted rows release outright).
        let mut released: BTreeSet<(&str, RawKey)> = BTreeSet::new();
        // Keys inserted by this plan, visible to reference checks.
        let mut planned_puts: BTreeSet<(&str, RawKey)> = BTreeSet::new();
        let mut planned_deletes: BTreeSet<(&str, RawKey)> = BTreeSet::new();

        for op in &plan.ops {
            released.insert((op.entity(), *op.key()));
            match op {
                CommitOp::Put { entity, key, .. } => {
                    planned_puts.insert((entity, *key));
                }
                CommitOp::Delete { entity, key, .. } => {
                    planned_deletes.insert((entity, *key));
                }
            }
        }

        // Unique-index claims made within this plan, checked against each
        // other as well as against the stored state.
        let mut claims: BTreeMap<(&str, &str, &[u8]), RawKey> = BTreeMap::new();

        for op in &plan.ops {
            let table = self.table(op.entity())?;
            let current = table.rows.get(op.key()).map(|entry| entry.version);

            match op {
                CommitOp::Put {
                    entity,
                    key,
                    expected,
                    index_entries,
                    refs,
                    ..
                } => {
                    match expected {
                        VersionExpectation::Absent => {
                            if current.is_some() {
                                return Err(InternalError::constraint_violation(
                                    &format!("{entity}.primary_key"),
                                    format!(
                                        "generated id collision on {entity}/{}",
                                        EntityId::from_bytes(*key)
                                    ),
                                ));
                            }
                        }
                        VersionExpectation::Exactly(version) => {
                            if current != Some(*version) {
                                return Err(InternalError::version_conflict(
                                    entity,
                                    EntityId::from_bytes(*key),
                                    *version,
                                    current,
                                ));
                            }
                        }
                        VersionExpectation::Any => {}
                    }

                    for entry in index_entries {
                        let owner = table
                            .unique
                            .get(&entry.index)
                            .and_then(|map| map.get(&entry.value));
                        if let Some(owner) = owner
                            && owner != key
                            && !released.contains(&(entity.as_str(), *owner))
                        {
                            return Err(InternalError::constraint_violation(
                                &entry.index,
                                format!(
                                    "unique index '{}' already claimed by {entity}/{}",
                                    entry.index,
                                    EntityId::from_bytes(*owner)
                                ),
                            ));
                        }

                        let claim = (entity.as_str(), entry.index.as_str(), entry.value.as_slice());
                        if let Some(other) = claims.insert(claim, *key)
                            && other != *key
                        {
                            return Err(InternalError::constraint_violation(
                                &entry.index,
                                format!(
                                    "unique index '{}' claimed twice within one commit",
                                    entry.index
                                ),
                            ));
                        }
                    }

                    for reference in refs {
                        let target = (reference.entity.as_str(), reference.key);
                        let exists = (self.table(&reference.entity)?.rows.contains_key(&reference.key)
                            || planned_puts.contains(&target))
                            && !planned_deletes.contains(&target);
                        if !exists {
                            return Err(InternalError::constraint_violation(
                                &reference.constraint,
                                format!(
                                    "reference '{}' points at missing {}/{}",
                                    reference.constraint,
                                    reference.entity,
                                    EntityId::from_bytes(reference.key)
                                ),
                            ));
                        }
                    }
                }

                CommitOp::Delete { entity, expected, key } => {
                    if let VersionExpectation::Exactly(version) = expected
                        && current != Some(*version)
                    {
                        return Err(InternalError::version_conflict(
                            entity,
                            EntityId::from_bytes(*key),
                            *version,
                            current,
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    /// Mutation pass: mechanical replay of a prevalidated plan.
    fn apply_plan(&mut self, plan: &CommitPlan) -> Result<(), InternalError> {
        for op in &plan.ops {
            let table = self.table_mut(op.entity())?;

            match op {
                CommitOp::Put {
                    key,
                    expected,
                    bytes,
                    index_entries,
                    ..
                } => {
                    let previous = table.rows.remove(key);
                    if let Some(previous) = &previous {
                        for (index, value) in &previous.index_entries {
                            // An earlier op in this plan may have re-pointed
                            // the entry at another row; only release it while
                            // it still belongs to this one.
                            if let Some(map) = table.unique.get_mut(index)
                                && map.get(value) == Some(key)
                            {
                                map.remove(value);
                            }
                        }
                    }

                    let version = match expected {
                        VersionExpectation::Absent => 1,
                        VersionExpectation::Exactly(version) => version + 1,
                        VersionExpectation::Any => {
                            previous.as_ref().map_or(1, |entry| entry.version + 1)
                        }
                    };

                    for entry in index_entries {
                        table
                            .unique
                            .entry(entry.index.clone())
                            .or_default()
                            .insert(entry.value.clone(), *key);
                    }
                    table.rows.insert(
                        *key,
                        StoredEntry {
                            version,
                            bytes: bytes.clone(),
                            index_entries: index_entries
                                .iter()
                                .map(|entry| (entry.index.clone(), entry.value.clone()))
                                .collect(),
                        },
                    );
                }

                CommitOp::Delete { key, .. } => {
                    // Deleting an absent key is a no-op by contract.
                    if let Some(previous) = table.rows.remove(key) {
                        for (index, value) in &previous.index_entries {
                            if let Some(map) = table.unique.get_mut(index)
                                && map.get(value) == Some(key)
                            {
                                map.remove(value);
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

///
/// MemoryDriver
///
/// In-process storage backend. Tables are created up front from the entity
/// registry; connections share the store behind one RwLock.
///

#[derive(Clone)]
pub struct MemoryDriver {
    store: Arc<RwLock<MemoryStore>>,
}

impl MemoryDriver {
    /// Build a driver with one table per registered entity.
    #[must_use]
    pub fn new(registry: &EntityRegistry) -> Self {
        let mut store = MemoryStore::default();
        for model in registry.all() {
            let mut table = Table::default();
            for index in model.indexes() {
                table.unique.insert(index.name.clone(), BTreeMap::new());
            }
            store.tables.insert(model.name().to_string(), table);
        }

        log::debug!("memory driver ready with {} tables", store.tables.len());
        Self {
            store: Arc::new(RwLock::new(store)),
        }
    }
}

impl StorageDriver for MemoryDriver {
    fn connect(&self) -> Result<Box<dyn StorageConnection>, InternalError> {
        Ok(Box::new(MemoryConnection {
            store: Arc::clone(&self.store),
        }))
    }
}

///
/// MemoryConnection
///

struct MemoryConnection {
    store: Arc<RwLock<MemoryStore>>,
}

impl StorageConnection for MemoryConnection {
    fn get(&mut self, entity: &str, key: &RawKey) -> Result<Option<StoredRow>, InternalError> {
        let store = self.store.read();

        Ok(store.table(entity)?.rows.get(key).map(|entry| StoredRow {
            version: entry.version,
            bytes: entry.bytes.clone(),
        }))
    }

    fn scan(&mut self, entity: &str) -> Result<Vec<(RawKey, StoredRow)>, InternalError> {
        let store = self.store.read();

        Ok(store
            .table(entity)?
            .rows
            .iter()
            .map(|(key, entry)| {
                (
                    *key,
                    StoredRow {
                        version: entry.version,
                        bytes: entry.bytes.clone(),
                    },
                )
            })
            .collect())
    }

    fn apply(&mut self, plan: &CommitPlan) -> Result<(), InternalError> {
        // COMMIT WINDOW: the write lock serializes plan application, so
        // validation and mutation observe the same state.
        let mut store = self.store.write();

        store.validate_plan(plan)?;
        store.apply_plan(plan)?;

        log::debug!("applied commit plan {} ({} ops)", plan.id, plan.ops.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        session::commit::{CommitOp, CommitPlan, IndexEntry, RefCheck, VersionExpectation},
        test_fixtures::test_registry,
    };

    fn put_op(
        entity: &str,
        key: RawKey,
        expected: VersionExpectation,
        index_entries: Vec<IndexEntry>,
        refs: Vec<RefCheck>,
    ) -> CommitOp {
        CommitOp::Put {
            entity: entity.to_string(),
            key,
            expected,
            bytes: b"{}".to_vec(),
            index_entries,
            refs,
        }
    }

    fn apply(driver: &MemoryDriver, ops: Vec<CommitOp>) -> Result<(), InternalError> {
        let plan = CommitPlan::new(ops).expect("plan construction should succeed");
        driver.connect().expect("connect should succeed").apply(&plan)
    }

    #[test]
    fn insert_starts_at_version_one_and_updates_increment() {
        let driver = MemoryDriver::new(&test_registry());
        let key = EntityId::generate().expect("id generation should succeed").to_bytes();

        apply(
            &driver,
            vec![put_op("partner", key, VersionExpectation::Absent, vec![], vec![])],
        )
        .expect("insert should succeed");

        let mut conn = driver.connect().expect("connect should succeed");
        let stored = conn
            .get("partner", &key)
            .expect("get should succeed")
            .expect("row should exist");
        assert_eq!(stored.version, 1);

        apply(
            &driver,
            vec![put_op("partner", key, VersionExpectation::Exactly(1), vec![], vec![])],
        )
        .expect("versioned update should succeed");

        let stored = conn
            .get("partner", &key)
            .expect("get should succeed")
            .expect("row should exist");
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn stale_version_expectation_is_rejected_without_mutation() {
        let driver = MemoryDriver::new(&test_registry());
        let key = EntityId::generate().expect("id generation should succeed").to_bytes();

        apply(
            &driver,
            vec![put_op("partner", key, VersionExpectation::Absent, vec![], vec![])],
        )
        .expect("insert should succeed");

        let err = apply(
            &driver,
            vec![put_op("partner", key, VersionExpectation::Exactly(7), vec![], vec![])],
        )
        .expect_err("stale expectation should fail");
        assert!(err.is_conflict());

        let mut conn = driver.connect().expect("connect should succeed");
        let stored = conn
            .get("partner", &key)
            .expect("get should succeed")
            .expect("row should exist");
        assert_eq!(stored.version, 1, "failed plan must not mutate the store");
    }

    #[test]
    fn unique_claim_transfers_when_owner_is_overwritten_in_the_same_plan() {
        let driver = MemoryDriver::new(&test_registry());
        let first = EntityId::generate().expect("id generation should succeed").to_bytes();
        let second = EntityId::generate().expect("id generation should succeed").to_bytes();
        let email = IndexEntry {
            index: "partner.email".to_string(),
            value: b"a@example".to_vec(),
        };

        apply(
            &driver,
            vec![put_op(
                "partner",
                first,
                VersionExpectation::Absent,
                vec![email.clone()],
                vec![],
            )],
        )
        .expect("first insert should succeed");

        // Second row takes the email while the first row gives it up.
        apply(
            &driver,
            vec![
                put_op("partner", first, VersionExpectation::Exactly(1), vec![], vec![]),
                put_op(
                    "partner",
                    second,
                    VersionExpectation::Absent,
                    vec![email.clone()],
                    vec![],
                ),
            ],
        )
        .expect("claim transfer within one plan should succeed");

        let err = apply(
            &driver,
            vec![put_op(
                "partner",
                first,
                VersionExpectation::Exactly(2),
                vec![email],
                vec![],
            )],
        )
        .expect_err("re-claiming a held unique value should fail");
        assert!(err.is_constraint());
    }

    #[test]
    fn unique_claim_survives_a_same_plan_delete_of_the_old_owner() {
        let driver = MemoryDriver::new(&test_registry());
        // Keys crafted so the new owner's put applies before the old
        // owner's delete.
        let old_owner = EntityId::from_parts(2, 0).to_bytes();
        let new_owner = EntityId::from_parts(1, 0).to_bytes();
        let email = IndexEntry {
            index: "partner.email".to_string(),
            value: b"handover@example".to_vec(),
        };

        apply(
            &driver,
            vec![put_op(
                "partner",
                old_owner,
                VersionExpectation::Absent,
                vec![email.clone()],
                vec![],
            )],
        )
        .expect("seed insert should succeed");

        apply(
            &driver,
            vec![
                put_op(
                    "partner",
                    new_owner,
                    VersionExpectation::Absent,
                    vec![email.clone()],
                    vec![],
                ),
                CommitOp::Delete {
                    entity: "partner".to_string(),
                    key: old_owner,
                    expected: VersionExpectation::Any,
                },
            ],
        )
        .expect("handover plan should succeed");

        let third = EntityId::from_parts(3, 0).to_bytes();
        let err = apply(
            &driver,
            vec![put_op(
                "partner",
                third,
                VersionExpectation::Absent,
                vec![email],
                vec![],
            )],
        )
        .expect_err("handed-over unique value must still be claimed");
        assert!(err.is_constraint());
    }

    #[test]
    fn duplicate_claims_within_one_plan_are_rejected() {
        let driver = MemoryDriver::new(&test_registry());
        let first = EntityId::generate().expect("id generation should succeed").to_bytes();
        let second = EntityId::generate().expect("id generation should succeed").to_bytes();
        let email = IndexEntry {
            index: "partner.email".to_string(),
            value: b"dup@example".to_vec(),
        };

        let err = apply(
            &driver,
            vec![
                put_op("partner", first, VersionExpectation::Absent, vec![email.clone()], vec![]),
                put_op("partner", second, VersionExpectation::Absent, vec![email], vec![]),
            ],
        )
        .expect_err("two claims for one value should fail");
        assert!(err.is_constraint());
    }

    #[test]
    fn reference_checks_see_puts_from_the_same_plan() {
        let driver = MemoryDriver::new(&test_registry());
        let partner = EntityId::generate().expect("id generation should succeed").to_bytes();
        let job = EntityId::generate().expect("id generation should succeed").to_bytes();
        let reference = RefCheck {
            constraint: "move_job.partner".to_string(),
            entity: "partner".to_string(),
            key: partner,
        };

        // Parent and child land in one plan.
        apply(
            &driver,
            vec![
                put_op("partner", partner, VersionExpectation::Absent, vec![], vec![]),
                put_op(
                    "move_job",
                    job,
                    VersionExpectation::Absent,
                    vec![],
                    vec![reference.clone()],
                ),
            ],
        )
        .expect("same-plan parent should satisfy the reference");

        let orphan = EntityId::generate().expect("id generation should succeed").to_bytes();
        let missing = RefCheck {
            constraint: "move_job.partner".to_string(),
            entity: "partner".to_string(),
            key: orphan,
        };
        let err = apply(
            &driver,
            vec![put_op(
                "move_job",
                job,
                VersionExpectation::Any,
                vec![],
                vec![missing],
            )],
        )
        .expect_err("missing parent should fail the reference check");
        assert!(err.is_constraint());
    }

    #[test]
    fn delete_is_idempotent_and_releases_unique_entries() {
        let driver = MemoryDriver::new(&test_registry());
        let key = EntityId::generate().expect("id generation should succeed").to_bytes();
        let email = IndexEntry {
            index: "partner.email".to_string(),
            value: b"gone@example".to_vec(),
        };

        apply(
            &driver,
            vec![put_op("partner", key, VersionExpectation::Absent, vec![email.clone()], vec![])],
        )
        .expect("insert should succeed");

        let delete = CommitOp::Delete {
            entity: "partner".to_string(),
            key,
            expected: VersionExpectation::Any,
        };
        apply(&driver, vec![delete.clone()]).expect("first delete should succeed");
        apply(&driver, vec![delete]).expect("second delete should be a no-op");

        // Released value can be claimed by a fresh row.
        let other = EntityId::generate().expect("id generation should succeed").to_bytes();
        apply(
            &driver,
            vec![put_op("partner", other, VersionExpectation::Absent, vec![email], vec![])],
        )
        .expect("released unique value should be claimable");
    }
}
