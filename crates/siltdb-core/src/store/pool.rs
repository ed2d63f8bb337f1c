use crate::{
    error::InternalError,
    store::{StorageConnection, StorageDriver},
};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

///
/// PoolState
///

struct PoolState {
    idle: Vec<Box<dyn StorageConnection>>,
    outstanding: usize,
    closed: bool,
}

///
/// ConnectionPool
///
/// Bounded pool over a storage driver. Sessions check a connection out for
/// their whole scope and hand it back on drop. When every slot is taken,
/// `acquire` blocks up to the configured timeout.
///

pub struct ConnectionPool {
    driver: Box<dyn StorageDriver>,
    state: Mutex<PoolState>,
    available: Condvar,
    max: usize,
    timeout: Duration,
}

impl ConnectionPool {
    /// Build a pool with `max` slots and the given acquire timeout.
    pub fn new(
        driver: impl StorageDriver,
        max: usize,
        timeout: Duration,
    ) -> Result<Self, InternalError> {
        if max == 0 {
            return Err(InternalError::store_io(
                "connection pool requires at least one slot",
            ));
        }

        Ok(Self {
            driver: Box::new(driver),
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(max),
                outstanding: 0,
                closed: false,
            }),
            available: Condvar::new(),
            max,
            timeout,
        })
    }

    /// Check a connection out, blocking up to the acquire timeout.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledConnection, InternalError> {
        let deadline = Instant::now() + self.timeout;
        let mut state = self.state.lock();

        loop {
            if state.closed {
                return Err(InternalError::store_io("connection pool is closed"));
            }

            if let Some(conn) = state.idle.pop() {
                state.outstanding += 1;

                return Ok(PooledConnection {
                    pool: Arc::clone(self),
                    conn: Some(conn),
                });
            }

            if state.outstanding < self.max {
                state.outstanding += 1;
                drop(state);

                // Connect outside the lock; undo the reservation on failure.
                match self.driver.connect() {
                    Ok(conn) => {
                        return Ok(PooledConnection {
                            pool: Arc::clone(self),
                            conn: Some(conn),
                        });
                    }
                    Err(err) => {
                        self.state.lock().outstanding -= 1;
                        self.available.notify_one();

                        return Err(err);
                    }
                }
            }

            if self.available.wait_until(&mut state, deadline).timed_out() {
                return Err(InternalError::store_io(format!(
                    "timed out after {:?} waiting for a pool slot ({} in use)",
                    self.timeout, self.max
                )));
            }
        }
    }

    /// Close the pool. Idle connections are dropped and future acquires
    /// fail; outstanding connections finish their sessions and are dropped
    /// at check-in.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.idle.clear();
        drop(state);

        self.available.notify_all();
        log::info!("connection pool closed");
    }

    fn checkin(&self, conn: Box<dyn StorageConnection>) {
        let mut state = self.state.lock();
        state.outstanding -= 1;
        if !state.closed {
            state.idle.push(conn);
        }
        drop(state);

        self.available.notify_one();
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max", &self.max)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

///
/// PooledConnection
///
/// RAII handle around a checked-out connection. `get` exposes the
/// underlying `StorageConnection`; check-in happens on drop.
///

pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<Box<dyn StorageConnection>>,
}

impl PooledConnection {
    pub(crate) fn get(&mut self) -> Result<&mut dyn StorageConnection, InternalError> {
        // The slot is only vacated inside drop.
        match self.conn.as_deref_mut() {
            Some(conn) => Ok(conn),
            None => Err(InternalError::store_internal(
                "pooled connection already released",
            )),
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("released", &self.conn.is_none())
            .finish_non_exhaustive()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::MemoryDriver, test_fixtures::test_registry};
    use std::sync::Barrier;
    use std::thread;

    fn pool(max: usize, timeout_ms: u64) -> Arc<ConnectionPool> {
        let driver = MemoryDriver::new(&test_registry());

        Arc::new(
            ConnectionPool::new(driver, max, Duration::from_millis(timeout_ms))
                .expect("pool construction should succeed"),
        )
    }

    #[test]
    fn zero_slots_is_rejected() {
        let driver = MemoryDriver::new(&test_registry());
        let err = ConnectionPool::new(driver, 0, Duration::from_millis(10))
            .expect_err("zero-slot pool should be rejected");

        assert_eq!(err.origin, crate::error::ErrorOrigin::Store);
    }

    #[test]
    fn checked_out_connections_reach_the_driver() {
        let pool = pool(1, 50);

        let mut held = pool.acquire().expect("acquire should succeed");
        let rows = held
            .get()
            .expect("held connection should be live")
            .scan("partner")
            .expect("scan through the pool should succeed");
        assert!(rows.is_empty());
    }

    #[test]
    fn released_connections_are_reused() {
        let pool = pool(1, 50);

        let first = pool.acquire().expect("first acquire should succeed");
        drop(first);
        let _second = pool.acquire().expect("acquire after release should succeed");
    }

    #[test]
    fn exhausted_pool_times_out() {
        let pool = pool(1, 20);

        let _held = pool.acquire().expect("first acquire should succeed");
        let err = pool
            .acquire()
            .expect_err("second acquire should time out");
        assert_eq!(err.class, crate::error::ErrorClass::Io);
    }

    #[test]
    fn waiter_wakes_when_a_slot_frees() {
        let pool = pool(1, 2_000);
        let held = pool.acquire().expect("first acquire should succeed");
        let gate = Arc::new(Barrier::new(2));

        let waiter = {
            let pool = Arc::clone(&pool);
            let gate = Arc::clone(&gate);

            thread::spawn(move || {
                gate.wait();
                pool.acquire().map(drop)
            })
        };

        gate.wait();
        thread::sleep(Duration::from_millis(20));
        drop(held);

        waiter
            .join()
            .expect("waiter thread should not panic")
            .expect("waiter should acquire the freed slot");
    }

    #[test]
    fn closed_pool_rejects_acquire() {
        let pool = pool(2, 50);

        pool.close();
        let err = pool.acquire().expect_err("closed pool should reject acquire");
        assert_eq!(err.class, crate::error::ErrorClass::Io);
    }
}
