pub mod commit;

use crate::{
    error::InternalError,
    model::EntityModel,
    registry::EntityRegistry,
    row::{Row, RowEnvelope, decode_row, encode_row},
    session::commit::{CommitOp, CommitPlan, VersionExpectation, index_entries_for_row, ref_checks_for_row},
    store::{ConnectionPool, PooledConnection},
    value::EntityId,
};
use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt,
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

///
/// SessionState
///
/// Lifecycle of one unit of work. A session starts Active on scope entry
/// and ends Closed; Committing and RollingBack are the terminal
/// transitions in flight.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Active,
    Committing,
    RollingBack,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Active => "active",
            Self::Committing => "committing",
            Self::RollingBack => "rolling_back",
            Self::Closed => "closed",
        };
        write!(f, "{label}")
    }
}

///
/// PendingOp
///
/// One staged mutation, keyed by (entity, id). Later stages for the same
/// key replace earlier ones, so a session commits at most one op per row.
///

#[derive(Clone, Debug)]
enum PendingOp {
    Save { row: Row, fresh: bool },
    Delete,
}

///
/// SessionCore
///
/// Shared state behind a session scope: the checked-out connection, the
/// tracked row versions, and the staged mutations. Repositories reach it
/// through the ambient scope; the handle types own its lifecycle.
///

pub struct SessionCore {
    state: SessionState,
    conn: Option<PooledConnection>,
    registry: Arc<EntityRegistry>,
    tracked: BTreeMap<(String, EntityId), u64>,
    pending: BTreeMap<(String, EntityId), PendingOp>,
    rollback_only: bool,
}

impl SessionCore {
    fn new(registry: Arc<EntityRegistry>, conn: PooledConnection) -> Self {
        Self {
            state: SessionState::Active,
            conn: Some(conn),
            registry,
            tracked: BTreeMap::new(),
            pending: BTreeMap::new(),
            rollback_only: false,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Refuse further work once the session left Active.
    fn ensure_active(&self) -> Result<(), InternalError> {
        match self.state {
            SessionState::Active => Ok(()),
            state => Err(InternalError::session_closed(state)),
        }
    }

    fn connection(&mut self) -> Result<&mut PooledConnection, InternalError> {
        self.conn
            .as_mut()
            .ok_or_else(|| InternalError::session_invariant("active session has no connection"))
    }

    /// Load one row by id, observing this session's own staged changes
    /// before the store.
    pub(crate) fn load(
        &mut self,
        model: &EntityModel,
        id: EntityId,
    ) -> Result<Option<Row>, InternalError> {
        self.ensure_active()?;

        let key = (model.name().to_string(), id);
        match self.pending.get(&key) {
            Some(PendingOp::Save { row, .. }) => return Ok(Some(row.clone())),
            Some(PendingOp::Delete) => return Ok(None),
            None => {}
        }

        let entity = model.name().to_string();
        let stored = self.connection()?.get()?.get(&entity, &id.to_bytes())?;
        let Some(stored) = stored else {
            return Ok(None);
        };

        let envelope = RowEnvelope::new(stored.version, decode_row(&stored.bytes)?);
        self.tracked.insert(key, envelope.version);

        Ok(Some(envelope.row))
    }

    /// Scan all rows of one entity in primary-key order, with this
    /// session's staged saves and deletes folded in.
    pub(crate) fn scan(&mut self, model: &EntityModel) -> Result<Vec<Row>, InternalError> {
        self.ensure_active()?;

        let entity = model.name().to_string();
        let stored = self.connection()?.get()?.scan(&entity)?;

        let mut merged: BTreeMap<EntityId, Row> = BTreeMap::new();
        for (key, stored) in stored {
            let id = EntityId::from_bytes(key);
            self.tracked.insert((entity.clone(), id), stored.version);
            merged.insert(id, decode_row(&stored.bytes)?);
        }

        for ((pending_entity, id), op) in &self.pending {
            if *pending_entity != entity {
                continue;
            }
            match op {
                PendingOp::Save { row, .. } => {
                    merged.insert(*id, row.clone());
                }
                PendingOp::Delete => {
                    merged.remove(id);
                }
            }
        }

        Ok(merged.into_values().collect())
    }

    /// Stage a save. `fresh` marks an identity generated in this session,
    /// which must not exist in the store at commit time.
    pub(crate) fn stage_save(
        &mut self,
        model: &EntityModel,
        id: EntityId,
        row: Row,
        fresh: bool,
    ) -> Result<(), InternalError> {
        self.ensure_active()?;

        let key = (model.name().to_string(), id);
        // A re-save keeps the fresh marking from the first stage.
        let fresh = fresh
            || matches!(
                self.pending.get(&key),
                Some(PendingOp::Save { fresh: true, .. })
            );
        self.pending.insert(key, PendingOp::Save { row, fresh });

        Ok(())
    }

    /// Stage a delete. Deleting an untracked or absent row is permitted;
    /// the store treats it as a no-op.
    pub(crate) fn stage_delete(
        &mut self,
        model: &EntityModel,
        id: EntityId,
    ) -> Result<(), InternalError> {
        self.ensure_active()?;

        self.pending
            .insert((model.name().to_string(), id), PendingOp::Delete);

        Ok(())
    }

    /// Drop a row from tracking and staging. A later save of the same id
    /// commits without a version expectation.
    pub(crate) fn detach(&mut self, entity: &str, id: EntityId) {
        let key = (entity.to_string(), id);
        self.tracked.remove(&key);
        self.pending.remove(&key);
    }

    pub(crate) fn mark_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// Compile the staged mutations into a commit plan.
    fn build_plan(&self) -> Result<CommitPlan, InternalError> {
        let mut ops = Vec::with_capacity(self.pending.len());

        for ((entity, id), op) in &self.pending {
            let key = id.to_bytes();

            match op {
                PendingOp::Save { row, fresh } => {
                    let model = self.registry.resolve(entity)?;
                    let expected = if *fresh {
                        VersionExpectation::Absent
                    } else if let Some(version) = self.tracked.get(&(entity.clone(), *id)) {
                        VersionExpectation::Exactly(*version)
                    } else {
                        VersionExpectation::Any
                    };

                    ops.push(CommitOp::Put {
                        entity: entity.clone(),
                        key,
                        expected,
                        bytes: encode_row(row)?,
                        index_entries: index_entries_for_row(&model, row)?,
                        refs: ref_checks_for_row(&model, row),
                    });
                }
                PendingOp::Delete => {
                    ops.push(CommitOp::Delete {
                        entity: entity.clone(),
                        key,
                        expected: VersionExpectation::Any,
                    });
                }
            }
        }

        CommitPlan::new(ops)
    }

    /// Commit the staged work atomically and close the session.
    fn commit(&mut self) -> Result<(), InternalError> {
        self.ensure_active()?;
        self.state = SessionState::Committing;

        let plan = self.build_plan()?;
        if !plan.is_empty() {
            let result = self.connection()?.get()?.apply(&plan);
            if let Err(err) = result {
                log::debug!("commit plan {} rejected: {}", plan.id, err.display_with_class());
                self.discard();

                return Err(err);
            }
            log::debug!("committed plan {} ({} ops)", plan.id, plan.ops.len());
        }

        self.discard();
        Ok(())
    }

    /// Discard the staged work and close the session.
    fn rollback(&mut self) -> Result<(), InternalError> {
        self.ensure_active()?;
        self.state = SessionState::RollingBack;
        self.discard();

        Ok(())
    }

    /// Release the connection and reach the terminal state.
    fn discard(&mut self) {
        self.tracked.clear();
        self.pending.clear();
        self.conn = None;
        self.state = SessionState::Closed;
    }
}

///
/// ActiveScope
///
/// Thread-local record of the session visible to repositories. `depth`
/// counts re-entrant `with_session` scopes joining the same session.
///

struct ActiveScope {
    manager_id: usize,
    core: Rc<RefCell<SessionCore>>,
    depth: usize,
}

thread_local! {
    static CURRENT: RefCell<Option<ActiveScope>> = const { RefCell::new(None) };
}

static NEXT_MANAGER_ID: AtomicUsize = AtomicUsize::new(1);

///
/// SessionManager
///
/// Owns the registry and the connection pool and hands out session scopes.
/// One session is active per thread at a time; nested scopes join the
/// outer session instead of opening a second transaction.
///

#[derive(Clone)]
pub struct SessionManager {
    id: usize,
    registry: Arc<EntityRegistry>,
    pool: Arc<ConnectionPool>,
}

impl SessionManager {
    #[must_use]
    pub fn new(registry: Arc<EntityRegistry>, pool: Arc<ConnectionPool>) -> Self {
        Self {
            id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
            registry,
            pool,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    /// Open an explicit session on this thread. The handle must be
    /// committed or rolled back; dropping it unfinished rolls back.
    pub fn begin(&self) -> Result<Session, InternalError> {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_some() {
                return Err(InternalError::session_invariant(
                    "a session is already active on this thread",
                ));
            }

            let conn = self.pool.acquire()?;
            let core = Rc::new(RefCell::new(SessionCore::new(
                Arc::clone(&self.registry),
                conn,
            )));
            *slot = Some(ActiveScope {
                manager_id: self.id,
                core: Rc::clone(&core),
                depth: 1,
            });

            Ok(Session {
                core,
                finished: false,
            })
        })
    }

    /// Run `work` inside a session scope with guaranteed release.
    ///
    /// The outer scope commits on Ok and rolls back on Err or panic. A
    /// nested scope joins the outer session; if the nested work fails, the
    /// outer session is marked rollback-only and its eventual commit is
    /// refused.
    pub fn with_session<T, E>(&self, work: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<InternalError>,
    {
        let entered = CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            match slot.as_mut() {
                Some(scope) if scope.manager_id == self.id => {
                    scope.depth += 1;
                    Ok((Rc::clone(&scope.core), false))
                }
                Some(_) => Err(InternalError::session_invariant(
                    "a session from another manager is already active on this thread",
                )),
                None => {
                    let conn = self.pool.acquire()?;
                    let core = Rc::new(RefCell::new(SessionCore::new(
                        Arc::clone(&self.registry),
                        conn,
                    )));
                    *slot = Some(ActiveScope {
                        manager_id: self.id,
                        core: Rc::clone(&core),
                        depth: 1,
                    });

                    Ok((core, true))
                }
            }
        });
        let (core, outer) = match entered {
            Ok(entered) => entered,
            Err(err) => return Err(E::from(err)),
        };

        let result = {
            let _guard = ScopeGuard { outer };
            work()
        };

        if outer {
            let mut core = core.borrow_mut();
            match result {
                Ok(value) => {
                    if core.is_rollback_only() {
                        core.rollback().map_err(E::from)?;

                        Err(E::from(InternalError::session_invariant(
                            "session was marked rollback-only by a nested scope",
                        )))
                    } else {
                        core.commit().map_err(E::from)?;

                        Ok(value)
                    }
                }
                Err(err) => {
                    // The work's error wins over a rollback failure.
                    if let Err(rollback_err) = core.rollback() {
                        log::warn!(
                            "rollback after failed session work also failed: {}",
                            rollback_err.display_with_class()
                        );
                    }

                    Err(err)
                }
            }
        } else {
            if result.is_err() {
                core.borrow_mut().mark_rollback_only();
            }

            result
        }
    }

    /// The session currently active on this thread, for repositories.
    pub(crate) fn current_core(&self) -> Result<Rc<RefCell<SessionCore>>, InternalError> {
        CURRENT.with(|slot| match slot.borrow().as_ref() {
            Some(scope) if scope.manager_id == self.id => Ok(Rc::clone(&scope.core)),
            _ => Err(InternalError::session_unavailable()),
        })
    }
}

///
/// ScopeGuard
///
/// Unwinds the thread-local scope on every exit path. On panic the staged
/// work is discarded so the connection still returns to the pool.
///

struct ScopeGuard {
    outer: bool,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            let Some(scope) = slot.as_mut() else {
                return;
            };

            if self.outer {
                if thread::panicking() {
                    let mut core = scope.core.borrow_mut();
                    if core.state() == SessionState::Active {
                        let _ = core.rollback();
                    }
                }
                *slot = None;
            } else {
                scope.depth -= 1;
                if thread::panicking() {
                    scope.core.borrow_mut().mark_rollback_only();
                }
            }
        });
    }
}

///
/// Session
///
/// Explicit handle from [`SessionManager::begin`]. Commit and rollback
/// consume the scope; an unfinished handle rolls back on drop.
///

pub struct Session {
    core: Rc<RefCell<SessionCore>>,
    finished: bool,
}

impl Session {
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.core.borrow().state()
    }

    /// Commit the staged work. Refused when a nested scope marked the
    /// session rollback-only.
    pub fn commit(&mut self) -> Result<(), InternalError> {
        self.finished = true;
        clear_scope();

        let mut core = self.core.borrow_mut();
        if core.is_rollback_only() {
            core.rollback()?;

            return Err(InternalError::session_invariant(
                "session was marked rollback-only by a nested scope",
            ));
        }

        core.commit()
    }

    /// Discard the staged work.
    pub fn rollback(&mut self) -> Result<(), InternalError> {
        self.finished = true;
        clear_scope();

        self.core.borrow_mut().rollback()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Session");
        if let Ok(core) = self.core.try_borrow() {
            out.field("state", &core.state());
        }

        out.field("finished", &self.finished).finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.finished {
            clear_scope();
            let mut core = self.core.borrow_mut();
            if core.state() == SessionState::Active {
                let _ = core.rollback();
            }
        }
    }
}

fn clear_scope() {
    CURRENT.with(|slot| slot.borrow_mut().take());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{partner_row, test_manager};
    use crate::value::Value;

    #[test]
    fn session_state_advances_to_closed_on_commit() {
        let manager = test_manager();
        let mut session = manager.begin().expect("begin should succeed");

        assert_eq!(session.state(), SessionState::Active);
        session.commit().expect("empty commit should succeed");
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn operations_after_commit_are_refused() {
        let manager = test_manager();
        let mut session = manager.begin().expect("begin should succeed");
        session.commit().expect("commit should succeed");

        let err = session
            .commit()
            .expect_err("second commit should be refused");
        assert_eq!(err.class, crate::error::ErrorClass::Closed);
    }

    #[test]
    fn begin_refuses_a_second_session_on_the_same_thread() {
        let manager = test_manager();
        let _session = manager.begin().expect("first begin should succeed");

        let err = manager
            .begin()
            .expect_err("second begin on one thread should be refused");
        assert_eq!(err.class, crate::error::ErrorClass::InvariantViolation);
    }

    #[test]
    fn dropping_an_unfinished_session_releases_the_scope() {
        let manager = test_manager();
        {
            let _session = manager.begin().expect("begin should succeed");
        }

        let mut session = manager
            .begin()
            .expect("scope should be free after the drop");
        session.rollback().expect("rollback should succeed");
    }

    #[test]
    fn with_session_commits_on_ok() {
        let manager = test_manager();
        let id = EntityId::generate().expect("id generation should succeed");
        let model = manager
            .registry()
            .resolve("partner")
            .expect("partner should be registered");

        manager
            .with_session(|| -> Result<(), InternalError> {
                let core = manager.current_core()?;
                core.borrow_mut()
                    .stage_save(&model, id, partner_row(id, "Acme Movers"), true)
            })
            .expect("scope should commit");

        manager
            .with_session(|| -> Result<(), InternalError> {
                let core = manager.current_core()?;
                let row = core
                    .borrow_mut()
                    .load(&model, id)?
                    .expect("committed row should be visible");
                assert_eq!(row.get("name"), Some(&Value::Text("Acme Movers".to_string())));

                Ok(())
            })
            .expect("read scope should commit");
    }

    #[test]
    fn with_session_rolls_back_on_err() {
        let manager = test_manager();
        let id = EntityId::generate().expect("id generation should succeed");
        let model = manager
            .registry()
            .resolve("partner")
            .expect("partner should be registered");

        let result = manager.with_session(|| -> Result<(), InternalError> {
            let core = manager.current_core()?;
            core.borrow_mut()
                .stage_save(&model, id, partner_row(id, "Acme Movers"), true)?;

            Err(InternalError::session_invariant("forced failure"))
        });
        result.expect_err("scope should surface the work's error");

        manager
            .with_session(|| -> Result<(), InternalError> {
                let core = manager.current_core()?;
                assert!(
                    core.borrow_mut().load(&model, id)?.is_none(),
                    "rolled-back save must not be visible"
                );

                Ok(())
            })
            .expect("read scope should commit");
    }

    #[test]
    fn nested_scope_joins_the_outer_session() {
        let manager = test_manager();
        let id = EntityId::generate().expect("id generation should succeed");
        let model = manager
            .registry()
            .resolve("partner")
            .expect("partner should be registered");

        manager
            .with_session(|| -> Result<(), InternalError> {
                let core = manager.current_core()?;
                core.borrow_mut()
                    .stage_save(&model, id, partner_row(id, "Acme Movers"), true)?;

                manager.with_session(|| -> Result<(), InternalError> {
                    let inner = manager.current_core()?;
                    let row = inner
                        .borrow_mut()
                        .load(&model, id)?
                        .expect("nested scope should observe the outer staging");
                    assert_eq!(row.id("id"), Some(id));

                    Ok(())
                })
            })
            .expect("joined scopes should commit once");
    }

    #[test]
    fn nested_failure_marks_the_outer_session_rollback_only() {
        let manager = test_manager();
        let id = EntityId::generate().expect("id generation should succeed");
        let model = manager
            .registry()
            .resolve("partner")
            .expect("partner should be registered");

        let result = manager.with_session(|| -> Result<(), InternalError> {
            let core = manager.current_core()?;
            core.borrow_mut()
                .stage_save(&model, id, partner_row(id, "Acme Movers"), true)?;

            let nested = manager.with_session(|| -> Result<(), InternalError> {
                Err(InternalError::session_invariant("nested failure"))
            });
            assert!(nested.is_err(), "nested error should propagate");

            // Swallowing the nested error must not let the outer commit.
            Ok(())
        });

        let err = result.expect_err("rollback-only session must refuse to commit");
        assert_eq!(err.class, crate::error::ErrorClass::InvariantViolation);

        manager
            .with_session(|| -> Result<(), InternalError> {
                let core = manager.current_core()?;
                assert!(
                    core.borrow_mut().load(&model, id)?.is_none(),
                    "rollback-only session must not have committed"
                );

                Ok(())
            })
            .expect("read scope should commit");
    }

    #[test]
    fn detached_rows_save_without_a_version_expectation() {
        let manager = test_manager();
        let id = EntityId::generate().expect("id generation should succeed");
        let model = manager
            .registry()
            .resolve("partner")
            .expect("partner should be registered");

        manager
            .with_session(|| -> Result<(), InternalError> {
                let core = manager.current_core()?;
                core.borrow_mut()
                    .stage_save(&model, id, partner_row(id, "Acme Movers"), true)
            })
            .expect("seed scope should commit");

        manager
            .with_session(|| -> Result<(), InternalError> {
                let core = manager.current_core()?;
                let mut core = core.borrow_mut();
                core.load(&model, id)?;
                core.detach(model.name(), id);
                // A stale-looking save is accepted because tracking is gone.
                core.stage_save(&model, id, partner_row(id, "Acme Movers Ltd"), false)
            })
            .expect("detached save should commit");
    }
}
