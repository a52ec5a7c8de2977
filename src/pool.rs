//! Bounded pool of reusable connections.
//!
//! The pool hands out at most `max_connections` connections at a time.
//! Released connections go back to an idle list and are reused most recently
//! used first; connections that are too old, broken or reported closed by
//! their factory are closed instead.
use std::{
    collections::VecDeque,
    ops::{Deref, DerefMut},
    sync::{Arc, Weak},
    thread,
    time::{Duration, Instant},
};

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};

use crate::error::{ClientError, ClientResult};

/// Creates and tears down the connections a [`ConnectionPool`] manages.
pub trait Connect: Send + Sync + 'static {
    type Connection: Send;

    fn connect(&self) -> ClientResult<Self::Connection>;

    /// Whether `conn` can no longer be used.
    fn is_closed(&self, conn: &Self::Connection) -> bool;

    fn close(&self, conn: Self::Connection);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolConfig {
    pub max_connections: usize,
    /// Connections older than this are closed instead of reused.
    pub max_age: Option<Duration>,
    /// Idle connections unused for this long are closed by a sweep.
    pub idle_timeout: Option<Duration>,
    /// How long `allocate` waits for a free slot. Waits forever when unset.
    pub allocate_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            max_age: Some(Duration::from_secs(30 * 60)),
            idle_timeout: Some(Duration::from_secs(5 * 60)),
            allocate_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Point in time counters of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub created: u64,
    pub closed: u64,
    pub active: usize,
    pub idle: usize,
    pub waiting: usize,
    pub max: usize,
}

struct Entry<C> {
    conn: C,
    created: Instant,
    last_used: Instant,
}

struct Inner<C> {
    /// Most recently used first.
    idle: VecDeque<Entry<C>>,
    active: usize,
    waiting: usize,
    created: u64,
    closed: u64,
    shut_down: bool,
}

pub struct ConnectionPool<F: Connect> {
    factory: F,
    config: PoolConfig,
    inner: Mutex<Inner<F::Connection>>,
    available: Condvar,
}

impl<F: Connect> ConnectionPool<F> {
    pub fn new(factory: F, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            inner: Mutex::new(Inner {
                idle: VecDeque::new(),
                active: 0,
                waiting: 0,
                created: 0,
                closed: 0,
                shut_down: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    fn too_old(&self, created: Instant, now: Instant) -> bool {
        self.config
            .max_age
            .is_some_and(|max_age| now.saturating_duration_since(created) >= max_age)
    }

    /// Borrows a connection, creating one when none is idle and the pool is
    /// not full. Blocks while the pool is full.
    pub fn allocate(&self) -> ClientResult<PooledConnection<'_, F>> {
        let started = Instant::now();
        let deadline = self.config.allocate_timeout.map(|t| started + t);
        let mut stale = Vec::new();
        let mut inner = self.inner.lock();

        loop {
            if inner.shut_down {
                return Err(ClientError::Closed);
            }

            let now = Instant::now();
            while let Some(entry) = inner.idle.pop_front() {
                if self.too_old(entry.created, now) || self.factory.is_closed(&entry.conn) {
                    inner.closed += 1;
                    stale.push(entry.conn);
                    continue;
                }
                inner.active += 1;
                drop(inner);
                self.close_all(stale);
                trace!("reusing pooled connection");
                return Ok(PooledConnection::new(self, entry.conn, entry.created));
            }

            if inner.active < self.config.max_connections {
                inner.active += 1;
                drop(inner);
                self.close_all(stale);
                return self.create();
            }

            inner.waiting += 1;
            let timed_out = match deadline {
                Some(deadline) => self.available.wait_until(&mut inner, deadline).timed_out(),
                None => {
                    self.available.wait(&mut inner);
                    false
                }
            };
            inner.waiting -= 1;

            if timed_out {
                drop(inner);
                self.close_all(stale);
                return Err(ClientError::PoolExhausted {
                    max: self.config.max_connections,
                    waited: started.elapsed(),
                });
            }
        }
    }

    /// Opens a connection for a slot already counted as active.
    fn create(&self) -> ClientResult<PooledConnection<'_, F>> {
        match self.factory.connect() {
            Ok(conn) => {
                self.inner.lock().created += 1;
                debug!("opened pooled connection");
                Ok(PooledConnection::new(self, conn, Instant::now()))
            }
            Err(e) => {
                self.inner.lock().active -= 1;
                self.available.notify_one();
                Err(e)
            }
        }
    }

    fn put_back(&self, conn: F::Connection, created: Instant, broken: bool) {
        let now = Instant::now();
        let discard = broken || self.too_old(created, now) || self.factory.is_closed(&conn);

        let rejected = {
            let mut inner = self.inner.lock();
            inner.active -= 1;
            if discard || inner.shut_down {
                inner.closed += 1;
                Some(conn)
            } else {
                inner.idle.push_front(Entry {
                    conn,
                    created,
                    last_used: now,
                });
                None
            }
        };
        self.available.notify_one();

        if let Some(conn) = rejected {
            debug!("closing pooled connection (broken: {broken})");
            self.factory.close(conn);
        }
    }

    fn close_all(&self, conns: Vec<F::Connection>) {
        for conn in conns {
            self.factory.close(conn);
        }
    }

    /// Closes idle connections past their idle timeout or maximum age.
    /// Returns how many were closed.
    pub fn sweep_idle(&self) -> usize {
        let now = Instant::now();
        let expired = {
            let mut inner = self.inner.lock();
            let (keep, expired): (VecDeque<_>, VecDeque<_>) =
                inner.idle.drain(..).partition(|entry| {
                    let idle_for = now.saturating_duration_since(entry.last_used);
                    let idle_expired = self.config.idle_timeout.is_some_and(|t| idle_for >= t);
                    !(idle_expired || self.too_old(entry.created, now))
                });
            inner.idle = keep;
            inner.closed += expired.len() as u64;
            expired
        };

        let count = expired.len();
        if count > 0 {
            debug!("swept {count} idle connections");
        }
        self.close_all(expired.into_iter().map(|entry| entry.conn).collect());
        count
    }

    /// Closes every idle connection and refuses further allocations.
    /// Connections still borrowed are closed when returned.
    pub fn shutdown(&self) {
        let idle: Vec<_> = {
            let mut inner = self.inner.lock();
            inner.shut_down = true;
            inner.closed += inner.idle.len() as u64;
            inner.idle.drain(..).map(|entry| entry.conn).collect()
        };
        self.available.notify_all();
        self.close_all(idle);
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            created: inner.created,
            closed: inner.closed,
            active: inner.active,
            idle: inner.idle.len(),
            waiting: inner.waiting,
            max: self.config.max_connections,
        }
    }
}

impl<F: Connect> ConnectionPool<F> {
    /// Spawns a thread calling [`sweep_idle`](Self::sweep_idle) every
    /// `interval`. The thread only holds a weak reference and exits once the
    /// pool is dropped or shut down.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let pool: Weak<Self> = Arc::downgrade(self);
        let spawned = thread::Builder::new()
            .name("pool-sweeper".into())
            .spawn(move || {
                loop {
                    thread::sleep(interval);
                    let Some(pool) = pool.upgrade() else { break };
                    if pool.inner.lock().shut_down {
                        break;
                    }
                    pool.sweep_idle();
                }
                trace!("pool sweeper exiting");
            });
        if let Err(e) = spawned {
            warn!("failed to start pool sweeper: {e}");
        }
    }
}

/// A connection borrowed from a [`ConnectionPool`]. Dropping it returns the
/// connection to the pool.
pub struct PooledConnection<'a, F: Connect> {
    pool: &'a ConnectionPool<F>,
    conn: Option<F::Connection>,
    created: Instant,
    broken: bool,
}

impl<'a, F: Connect> PooledConnection<'a, F> {
    fn new(pool: &'a ConnectionPool<F>, conn: F::Connection, created: Instant) -> Self {
        Self {
            pool,
            conn: Some(conn),
            created,
            broken: false,
        }
    }

    pub fn release(self) {}

    /// Closes the connection instead of returning it to the pool.
    pub fn invalidate(mut self) {
        self.broken = true;
    }
}

impl<F: Connect> Deref for PooledConnection<'_, F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection already returned")
    }
}

impl<F: Connect> DerefMut for PooledConnection<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection already returned")
    }
}

impl<F: Connect> Drop for PooledConnection<'_, F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put_back(conn, self.created, self.broken);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            Barrier,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
    };

    use super::*;

    #[derive(Debug)]
    struct TestConn {
        id: usize,
        closed: bool,
    }

    #[derive(Default)]
    struct TestFactory {
        next_id: AtomicUsize,
        closed: AtomicUsize,
        refuse: AtomicBool,
    }

    impl Connect for TestFactory {
        type Connection = TestConn;

        fn connect(&self) -> ClientResult<TestConn> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ClientError::Connection(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "refused",
                )));
            }
            Ok(TestConn {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                closed: false,
            })
        }

        fn is_closed(&self, conn: &TestConn) -> bool {
            conn.closed
        }

        fn close(&self, _conn: TestConn) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(config: PoolConfig) -> Arc<ConnectionPool<TestFactory>> {
        Arc::new(ConnectionPool::new(TestFactory::default(), config))
    }

    fn config(max_connections: usize) -> PoolConfig {
        PoolConfig {
            max_connections,
            max_age: None,
            idle_timeout: None,
            allocate_timeout: Some(Duration::from_secs(5)),
        }
    }

    #[test]
    fn reuses_most_recently_released() {
        let pool = pool(config(4));
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let b_id = b.id;
        a.release();
        b.release();

        assert_eq!(pool.allocate().unwrap().id, b_id);
        let stats = pool.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.active, 0);
    }

    #[test]
    fn third_thread_waits_for_a_release() {
        let pool = pool(config(2));
        let barrier = Arc::new(Barrier::new(3));

        let holders: Vec<_> = (0..2)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let conn = pool.allocate().unwrap();
                    barrier.wait();
                    thread::sleep(Duration::from_millis(50));
                    conn.id
                })
            })
            .collect();

        barrier.wait();
        assert_eq!(pool.stats().active, 2);
        let started = Instant::now();
        let third = pool.allocate().unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));

        let held: Vec<_> = holders.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(held.contains(&third.id));
        assert_eq!(pool.stats().created, 2);
    }

    #[test]
    fn exhausted_pool_times_out() {
        let pool = pool(PoolConfig {
            allocate_timeout: Some(Duration::from_millis(30)),
            ..config(1)
        });
        let _held = pool.allocate().unwrap();

        match pool.allocate() {
            Err(ClientError::PoolExhausted { max, waited }) => {
                assert_eq!(max, 1);
                assert!(waited >= Duration::from_millis(30));
            }
            other => panic!("unexpected {:?}", other.map(|c| c.id)),
        }
        assert_eq!(pool.stats().waiting, 0);
    }

    #[test]
    fn over_age_connections_are_replaced() {
        let pool = pool(PoolConfig {
            max_age: Some(Duration::from_millis(20)),
            ..config(2)
        });
        let first = pool.allocate().unwrap();
        let first_id = first.id;
        first.release();

        thread::sleep(Duration::from_millis(30));
        let second = pool.allocate().unwrap();
        assert_ne!(second.id, first_id);

        let stats = pool.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.closed, 1);
        assert_eq!(pool.factory().closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidated_connection_is_closed() {
        let pool = pool(config(1));
        let conn = pool.allocate().unwrap();
        let id = conn.id;
        conn.invalidate();

        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().closed, 1);
        assert_ne!(pool.allocate().unwrap().id, id);
    }

    #[test]
    fn closed_connection_is_not_pooled() {
        let pool = pool(config(1));
        let mut conn = pool.allocate().unwrap();
        conn.closed = true;
        drop(conn);

        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.factory().closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn connect_failure_frees_the_slot() {
        let pool = pool(config(1));
        pool.factory().refuse.store(true, Ordering::SeqCst);
        assert!(matches!(pool.allocate(), Err(ClientError::Connection(_))));
        assert_eq!(pool.stats().active, 0);

        pool.factory().refuse.store(false, Ordering::SeqCst);
        assert!(pool.allocate().is_ok());
    }

    #[test]
    fn sweep_closes_idle_connections() {
        let pool = pool(PoolConfig {
            idle_timeout: Some(Duration::from_millis(10)),
            ..config(3)
        });
        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        drop((a, b));
        assert_eq!(pool.stats().idle, 2);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(pool.sweep_idle(), 2);
        assert_eq!(pool.stats().idle, 0);
        assert_eq!(pool.stats().closed, 2);
    }

    #[test]
    fn background_sweeper_runs() {
        let pool = pool(PoolConfig {
            idle_timeout: Some(Duration::from_millis(10)),
            ..config(1)
        });
        pool.start_sweeper(Duration::from_millis(5));
        pool.allocate().unwrap().release();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(pool.stats().idle, 0);
    }

    #[test]
    fn shutdown_refuses_allocations() {
        let pool = pool(config(2));
        let held = pool.allocate().unwrap();
        pool.allocate().unwrap().release();

        pool.shutdown();
        assert!(matches!(pool.allocate(), Err(ClientError::Closed)));
        drop(held);
        assert_eq!(pool.stats().closed, 2);
        assert_eq!(pool.stats().idle, 0);
    }
}
