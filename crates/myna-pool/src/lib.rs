//! Bounded blocking connection pool.
//!
//! The pool keeps two capacity-bounded partitions: a FIFO idle queue and an
//! in-use count. Admission is an atomic counter paired with a condition
//! variable, so `acquire` genuinely blocks the calling thread until a slot
//! frees or the timeout elapses. An independent reaper thread sweeps idle
//! connections oldest-first and releases the queue lock before performing
//! the potentially slow socket close.
//!
//! The pool is generic over a `ConnectionFactory`; the driver crate plugs
//! its connections in through the `ManagedConnection` trait, and tests use
//! mock connections.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use myna_core::{Error, PoolError, PoolErrorKind, Result};

/// A connection the pool can manage.
pub trait ManagedConnection: Send + 'static {
    /// Verify the connection is live (protocol ping).
    fn ping(&mut self) -> Result<()>;
    /// Reset server-side session state before reuse.
    fn reset(&mut self) -> Result<()>;
    /// Physically close the connection. Must not panic.
    fn close(&mut self);
    /// Whether an earlier failure makes this connection unusable.
    fn is_broken(&self) -> bool;
}

/// Opens new physical connections. The handshake/authentication
/// collaborator supplies the implementation; a closure works too.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: ManagedConnection;

    /// Open and fully establish a new connection.
    fn connect(&self) -> Result<Self::Connection>;
}

impl<C, F> ConnectionFactory for F
where
    C: ManagedConnection,
    F: Fn() -> Result<C> + Send + Sync + 'static,
{
    type Connection = C;

    fn connect(&self) -> Result<C> {
        self()
    }
}

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections opened at construction and kept through reaping
    pub min_size: usize,
    /// Hard bound on idle + in-use connections
    pub max_size: usize,
    /// Default wait budget for `acquire`
    pub acquire_timeout: Duration,
    /// Idle connections older than this are reaped
    pub idle_timeout: Option<Duration>,
    /// Connections older than this are closed on release instead of pooled
    pub max_lifetime: Option<Duration>,
    /// How often the reaper sweeps the idle queue
    pub reap_interval: Duration,
    /// Ping a reused connection before handing it out
    pub test_on_acquire: bool,
    /// Reset server-side session state on reuse
    pub reset_on_reuse: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
            reap_interval: Duration::from_secs(30),
            test_on_acquire: true,
            reset_on_reuse: false,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the given max size.
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            ..Default::default()
        }
    }

    /// Set the minimum pool size.
    pub fn min_size(mut self, n: usize) -> Self {
        self.min_size = n;
        self
    }

    /// Set the default acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the max connection lifetime.
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the reaper sweep interval.
    pub fn reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Enable or disable the liveness ping on reuse.
    pub fn test_on_acquire(mut self, enabled: bool) -> Self {
        self.test_on_acquire = enabled;
        self
    }

    /// Enable or disable session reset on reuse.
    pub fn reset_on_reuse(mut self, enabled: bool) -> Self {
        self.reset_on_reuse = enabled;
        self
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
}

impl PoolStats {
    /// Total connections the pool currently owns.
    pub fn total(&self) -> usize {
        self.idle + self.in_use
    }
}

struct IdleConn<C> {
    conn: C,
    created_at: Instant,
    idle_since: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConn<C>>,
    in_use: usize,
}

struct PoolShared<F: ConnectionFactory> {
    factory: F,
    config: PoolConfig,
    state: Mutex<PoolState<F::Connection>>,
    available: Condvar,
    /// Free capacity: `max_size - in_use`. Decremented optimistically on
    /// admission, returned under the state lock on release.
    permits: AtomicUsize,
    draining: AtomicBool,
}

/// A bounded blocking pool of connections.
pub struct Pool<F: ConnectionFactory> {
    shared: Arc<PoolShared<F>>,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a pool and pre-warm `min_size` connections.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        if config.max_size == 0 || config.min_size > config.max_size {
            return Err(Error::Pool(PoolError {
                kind: PoolErrorKind::Config,
                message: format!(
                    "invalid pool bounds: min {} / max {}",
                    config.min_size, config.max_size
                ),
            }));
        }

        let shared = Arc::new(PoolShared {
            permits: AtomicUsize::new(config.max_size),
            state: Mutex::new(PoolState {
                idle: VecDeque::with_capacity(config.max_size),
                in_use: 0,
            }),
            available: Condvar::new(),
            draining: AtomicBool::new(false),
            factory,
            config,
        });

        for _ in 0..shared.config.min_size {
            let conn = shared.factory.connect()?;
            let now = Instant::now();
            let mut state = shared.state.lock().expect("pool lock");
            state.idle.push_back(IdleConn {
                conn,
                created_at: now,
                idle_since: now,
            });
        }

        spawn_reaper(&shared);
        Ok(Self { shared })
    }

    /// Acquire a connection, waiting up to the configured timeout.
    pub fn acquire(&self) -> Result<PooledConnection<F>> {
        self.acquire_timeout(self.shared.config.acquire_timeout)
    }

    /// Acquire a connection, waiting up to `timeout` for a slot.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection<F>> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.shared.draining.load(Ordering::Acquire) {
                return Err(pool_closed());
            }

            // Optimistic admission: claim a slot if one is free.
            if try_admit(&self.shared.permits) {
                match self.shared.checkout() {
                    Ok((conn, created_at)) => {
                        return Ok(PooledConnection {
                            conn: Some(conn),
                            created_at,
                            shared: Arc::clone(&self.shared),
                        });
                    }
                    Err(err) => {
                        self.shared.return_permit();
                        return Err(err);
                    }
                }
            }

            // At capacity: block until a release signals or the deadline
            // passes.
            let state = self.shared.state.lock().expect("pool lock");
            if self.shared.permits.load(Ordering::Acquire) > 0 {
                continue; // freed between the failed admit and the lock
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(pool_exhausted(timeout));
            }
            let (state, wait) = self
                .shared
                .available
                .wait_timeout(state, deadline - now)
                .expect("pool lock");
            drop(state);
            if wait.timed_out() && Instant::now() >= deadline {
                return Err(pool_exhausted(timeout));
            }
        }
    }

    /// Current idle/in-use counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock().expect("pool lock");
        PoolStats {
            idle: state.idle.len(),
            in_use: state.in_use,
        }
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Begin draining: close all idle connections now, refuse new
    /// acquires, and close in-use connections as they are released. The
    /// pool is discardable once `is_drained` reports true.
    pub fn close(&self) {
        self.shared.draining.store(true, Ordering::Release);
        let victims: Vec<_> = {
            let mut state = self.shared.state.lock().expect("pool lock");
            state.idle.drain(..).collect()
        };
        let evicted = victims.len();
        for mut entry in victims {
            entry.conn.close();
        }
        if evicted > 0 {
            tracing::debug!(evicted, "pool drained idle connections");
        }
        self.shared.available.notify_all();
    }

    /// Whether draining has finished and the pool owns no connections.
    pub fn is_drained(&self) -> bool {
        let state = self.shared.state.lock().expect("pool lock");
        self.shared.draining.load(Ordering::Acquire) && state.idle.is_empty() && state.in_use == 0
    }
}

impl<F: ConnectionFactory> PoolShared<F> {
    /// Hand out an idle connection or open a new one. The caller already
    /// holds an admission permit.
    fn checkout(&self) -> Result<(F::Connection, Instant)> {
        loop {
            let entry = {
                let mut state = self.state.lock().expect("pool lock");
                state.idle.pop_front()
            };
            let Some(entry) = entry else {
                let conn = self.factory.connect()?;
                self.note_checked_out();
                return Ok((conn, Instant::now()));
            };

            let mut conn = entry.conn;
            if self
                .config
                .max_lifetime
                .is_some_and(|ttl| entry.created_at.elapsed() >= ttl)
            {
                conn.close();
                continue;
            }
            // Liveness and reset run outside the pool lock; both failures
            // just discard the candidate and try the next one.
            if self.config.test_on_acquire && conn.ping().is_err() {
                tracing::debug!("discarding idle connection that failed ping");
                conn.close();
                continue;
            }
            if self.config.reset_on_reuse && conn.reset().is_err() {
                tracing::debug!("discarding idle connection that failed reset");
                conn.close();
                continue;
            }
            self.note_checked_out();
            return Ok((conn, entry.created_at));
        }
    }

    fn note_checked_out(&self) {
        let mut state = self.state.lock().expect("pool lock");
        state.in_use += 1;
    }

    /// Return an unused admission permit (failed checkout).
    fn return_permit(&self) {
        let _state = self.state.lock().expect("pool lock");
        self.permits.fetch_add(1, Ordering::Release);
        self.available.notify_one();
    }

    /// Return a connection. It goes back to idle unless its lifetime
    /// expired, it is broken, or the pool is draining — then it is closed
    /// outside the pool's bookkeeping. Always signals one waiter.
    fn release(&self, mut conn: F::Connection, created_at: Instant) {
        let destroy = self.draining.load(Ordering::Acquire)
            || conn.is_broken()
            || self
                .config
                .max_lifetime
                .is_some_and(|ttl| created_at.elapsed() >= ttl);

        let to_close = {
            let mut state = self.state.lock().expect("pool lock");
            state.in_use -= 1;
            let out = if destroy {
                Some(conn)
            } else {
                state.idle.push_back(IdleConn {
                    conn,
                    created_at,
                    idle_since: Instant::now(),
                });
                None
            };
            // Permit returned under the lock so a waiter cannot miss the
            // wakeup between the counter bump and the notify.
            self.permits.fetch_add(1, Ordering::Release);
            self.available.notify_one();
            out
        };

        if let Some(mut conn) = to_close {
            conn.close();
        }
    }

    /// One reaper sweep: close idle connections older than the idle
    /// timeout, scanning oldest-first and stopping at the first
    /// non-expired entry, never dropping below `min_size`.
    fn reap(&self) {
        let Some(idle_timeout) = self.config.idle_timeout else {
            return;
        };
        let victims: Vec<_> = {
            let mut state = self.state.lock().expect("pool lock");
            let mut victims = Vec::new();
            while let Some(front) = state.idle.front() {
                if state.idle.len() + state.in_use <= self.config.min_size {
                    break;
                }
                if front.idle_since.elapsed() < idle_timeout {
                    break;
                }
                victims.push(state.idle.pop_front().expect("checked front"));
            }
            victims
        };
        // The queue lock is released before the potentially slow closes.
        if !victims.is_empty() {
            tracing::debug!(reaped = victims.len(), "closing expired idle connections");
        }
        for mut entry in victims {
            entry.conn.close();
        }
    }
}

fn try_admit(permits: &AtomicUsize) -> bool {
    permits
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1))
        .is_ok()
}

fn pool_exhausted(timeout: Duration) -> Error {
    Error::Pool(PoolError {
        kind: PoolErrorKind::Exhausted,
        message: format!("no connection became available within {timeout:?}"),
    })
}

fn pool_closed() -> Error {
    Error::Pool(PoolError {
        kind: PoolErrorKind::Closed,
        message: "pool is draining".to_string(),
    })
}

fn spawn_reaper<F: ConnectionFactory>(shared: &Arc<PoolShared<F>>) {
    let weak: Weak<PoolShared<F>> = Arc::downgrade(shared);
    let interval = shared.config.reap_interval;
    let spawned = std::thread::Builder::new()
        .name("myna-pool-reaper".to_string())
        .spawn(move || {
            loop {
                std::thread::sleep(interval);
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                if shared.draining.load(Ordering::Acquire) {
                    return;
                }
                shared.reap();
            }
        });
    if let Err(err) = spawned {
        tracing::warn!(error = %err, "failed to spawn pool reaper thread");
    }
}

/// Shared registry of pools keyed by a settings signature.
///
/// Callers that build connections from a settings object hash those
/// settings into a key; every caller with the same settings shares one
/// pool. A lost creation race resolves last-writer-wins under the
/// registry lock: the race loser's pool replaces the earlier one, which
/// drains as its borrowed connections come back. No partially built pool
/// is ever visible.
pub struct PoolRegistry<F: ConnectionFactory> {
    pools: Mutex<std::collections::HashMap<u64, Pool<F>>>,
}

impl<F: ConnectionFactory> Default for PoolRegistry<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ConnectionFactory> PoolRegistry<F> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Look up the pool for a settings signature.
    pub fn get(&self, key: u64) -> Option<Pool<F>> {
        self.pools.lock().expect("registry lock").get(&key).cloned()
    }

    /// Look up the pool for a settings signature, building it on a miss.
    ///
    /// The pool is constructed outside the registry lock (pre-warming may
    /// do I/O); concurrent builders race and the last insert wins.
    pub fn get_or_create(
        &self,
        key: u64,
        build: impl FnOnce() -> Result<Pool<F>>,
    ) -> Result<Pool<F>> {
        if let Some(pool) = self.get(key) {
            return Ok(pool);
        }
        let pool = build()?;
        let mut pools = self.pools.lock().expect("registry lock");
        if let Some(previous) = pools.insert(key, pool.clone()) {
            tracing::debug!(key, "replacing racing pool registration");
            previous.close();
        }
        Ok(pool)
    }

    /// Remove and drain the pool for a settings signature.
    pub fn remove(&self, key: u64) {
        let removed = self.pools.lock().expect("registry lock").remove(&key);
        if let Some(pool) = removed {
            pool.close();
        }
    }

    /// Drain every registered pool.
    pub fn clear(&self) {
        let pools: Vec<_> = {
            let mut map = self.pools.lock().expect("registry lock");
            map.drain().map(|(_, pool)| pool).collect()
        };
        for pool in pools {
            pool.close();
        }
    }

    /// Number of registered pools.
    pub fn len(&self) -> usize {
        self.pools.lock().expect("registry lock").len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A connection checked out of the pool. Returning it is guaranteed: the
/// connection goes back on drop, whatever path the caller takes.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    created_at: Instant,
    shared: Arc<PoolShared<F>>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Remove the connection from pool management entirely. The pool slot
    /// frees immediately.
    pub fn detach(mut self) -> F::Connection {
        let conn = self.conn.take().expect("connection present until drop");
        self.shared.return_permit_on_detach();
        conn
    }
}

impl<F: ConnectionFactory> PoolShared<F> {
    fn return_permit_on_detach(&self) {
        let _state = {
            let mut state = self.state.lock().expect("pool lock");
            state.in_use -= 1;
            state
        };
        self.permits.fetch_add(1, Ordering::Release);
        self.available.notify_one();
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("created_at", &self.created_at)
            .field("has_conn", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> std::ops::Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl<F: ConnectionFactory> std::ops::DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until drop")
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(conn, self.created_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;

    #[derive(Default)]
    struct FactoryStats {
        connected: Counter,
        closed: Counter,
        pings: Counter,
        resets: Counter,
    }

    struct MockConn {
        stats: Arc<FactoryStats>,
        broken: bool,
        fail_ping: bool,
    }

    impl ManagedConnection for MockConn {
        fn ping(&mut self) -> Result<()> {
            self.stats.pings.fetch_add(1, Ordering::SeqCst);
            if self.fail_ping {
                Err(Error::protocol("ping failed"))
            } else {
                Ok(())
            }
        }

        fn reset(&mut self) -> Result<()> {
            self.stats.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close(&mut self) {
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }

        fn is_broken(&self) -> bool {
            self.broken
        }
    }

    fn factory(stats: Arc<FactoryStats>) -> impl ConnectionFactory<Connection = MockConn> {
        move || {
            stats.connected.fetch_add(1, Ordering::SeqCst);
            Ok(MockConn {
                stats: Arc::clone(&stats),
                broken: false,
                fail_ping: false,
            })
        }
    }

    fn quick_config(min: usize, max: usize) -> PoolConfig {
        PoolConfig::new(max)
            .min_size(min)
            .acquire_timeout(Duration::from_millis(200))
            .reap_interval(Duration::from_millis(10))
            .idle_timeout(None)
            .max_lifetime(None)
    }

    #[test]
    fn prewarms_min_connections() {
        let stats = Arc::new(FactoryStats::default());
        let pool = Pool::new(factory(Arc::clone(&stats)), quick_config(2, 3)).unwrap();
        assert_eq!(stats.connected.load(Ordering::SeqCst), 2);
        assert_eq!(pool.stats(), PoolStats { idle: 2, in_use: 0 });
    }

    #[test]
    fn acquires_reuse_then_open() {
        // min=2, max=3: three acquires reuse the two idle connections and
        // open exactly one new physical connection.
        let stats = Arc::new(FactoryStats::default());
        let pool = Pool::new(factory(Arc::clone(&stats)), quick_config(2, 3)).unwrap();

        let c1 = pool.acquire().unwrap();
        let c2 = pool.acquire().unwrap();
        let c3 = pool.acquire().unwrap();
        assert_eq!(stats.connected.load(Ordering::SeqCst), 3);
        assert_eq!(pool.stats(), PoolStats { idle: 0, in_use: 3 });

        drop((c1, c2, c3));
        assert_eq!(pool.stats(), PoolStats { idle: 3, in_use: 0 });
    }

    #[test]
    fn fourth_acquire_blocks_until_release() {
        let stats = Arc::new(FactoryStats::default());
        let pool = Pool::new(factory(stats), quick_config(2, 3)).unwrap();

        let c1 = pool.acquire().unwrap();
        let _c2 = pool.acquire().unwrap();
        let _c3 = pool.acquire().unwrap();

        let pool2 = pool.clone();
        let waiter = std::thread::spawn(move || {
            pool2.acquire_timeout(Duration::from_secs(5)).map(|_| ())
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        drop(c1);
        waiter.join().unwrap().unwrap();
    }

    #[test]
    fn exhaustion_times_out() {
        let stats = Arc::new(FactoryStats::default());
        let pool = Pool::new(factory(stats), quick_config(0, 1)).unwrap();
        let _held = pool.acquire().unwrap();
        let err = pool.acquire_timeout(Duration::from_millis(30)).unwrap_err();
        match err {
            Error::Pool(p) => assert_eq!(p.kind, PoolErrorKind::Exhausted),
            other => panic!("expected pool error, got {other}"),
        }
    }

    #[test]
    fn blocked_acquirers_all_satisfied() {
        let stats = Arc::new(FactoryStats::default());
        let pool = Pool::new(factory(stats), quick_config(0, 2)).unwrap();
        let held: Vec<_> = (0..2).map(|_| pool.acquire().unwrap()).collect();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    let conn = pool.acquire_timeout(Duration::from_secs(5))?;
                    std::thread::sleep(Duration::from_millis(5));
                    drop(conn);
                    Ok::<(), Error>(())
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        drop(held);
        for waiter in waiters {
            waiter.join().unwrap().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert!(stats.total() <= 2);
    }

    #[test]
    fn capacity_invariant_under_contention() {
        let stats = Arc::new(FactoryStats::default());
        let pool = Pool::new(factory(stats), quick_config(1, 4)).unwrap();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        let conn = pool.acquire_timeout(Duration::from_secs(5)).unwrap();
                        let stats = pool.stats();
                        assert!(stats.total() <= 4, "pool exceeded max: {stats:?}");
                        drop(conn);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
    }

    #[test]
    fn broken_connection_not_pooled() {
        let stats = Arc::new(FactoryStats::default());
        let pool = Pool::new(factory(Arc::clone(&stats)), quick_config(0, 2)).unwrap();
        let mut conn = pool.acquire().unwrap();
        conn.broken = true;
        drop(conn);
        assert_eq!(pool.stats(), PoolStats { idle: 0, in_use: 0 });
        assert_eq!(stats.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_ping_discards_and_opens_fresh() {
        let stats = Arc::new(FactoryStats::default());
        let pool = Pool::new(factory(Arc::clone(&stats)), quick_config(1, 2)).unwrap();
        {
            let mut conn = pool.acquire().unwrap();
            conn.fail_ping = true;
        }
        let _conn = pool.acquire().unwrap();
        // The poisoned idle connection was closed and replaced.
        assert_eq!(stats.closed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.connected.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn reaper_respects_min_size() {
        let stats = Arc::new(FactoryStats::default());
        let config = quick_config(1, 3)
            .idle_timeout(Some(Duration::from_millis(1)))
            .reap_interval(Duration::from_millis(5));
        let pool = Pool::new(factory(Arc::clone(&stats)), config).unwrap();
        // Grow the pool to three idle connections.
        let held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
        drop(held);
        assert_eq!(pool.stats().idle, 3);

        std::thread::sleep(Duration::from_millis(100));
        let stats_now = pool.stats();
        assert_eq!(stats_now.idle, 1, "reaper must stop at min_size");
    }

    #[test]
    fn expired_lifetime_closes_on_release() {
        let stats = Arc::new(FactoryStats::default());
        let config = quick_config(0, 2).max_lifetime(Some(Duration::from_millis(1)));
        let pool = Pool::new(factory(Arc::clone(&stats)), config).unwrap();
        let conn = pool.acquire().unwrap();
        std::thread::sleep(Duration::from_millis(10));
        drop(conn);
        assert_eq!(pool.stats(), PoolStats { idle: 0, in_use: 0 });
        assert_eq!(stats.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn draining_closes_idle_and_released() {
        let stats = Arc::new(FactoryStats::default());
        let pool = Pool::new(factory(Arc::clone(&stats)), quick_config(2, 3)).unwrap();
        let conn = pool.acquire().unwrap();

        pool.close();
        assert!(matches!(
            pool.acquire().unwrap_err(),
            Error::Pool(PoolError {
                kind: PoolErrorKind::Closed,
                ..
            })
        ));
        assert!(!pool.is_drained()); // one connection still in use

        drop(conn); // closes instead of returning to idle
        assert!(pool.is_drained());
        assert_eq!(stats.closed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn fifo_reuse_order() {
        let stats = Arc::new(FactoryStats::default());
        let pool = Pool::new(factory(stats), quick_config(0, 2)).unwrap();
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        drop(first);
        std::thread::sleep(Duration::from_millis(2));
        drop(second);
        // Oldest idle entry is reused first.
        let stats = pool.stats();
        assert_eq!(stats.idle, 2);
        let _a = pool.acquire().unwrap();
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn detach_frees_the_slot() {
        let stats = Arc::new(FactoryStats::default());
        let pool = Pool::new(factory(stats), quick_config(0, 1)).unwrap();
        let conn = pool.acquire().unwrap();
        let _standalone = conn.detach();
        // The slot is free again.
        let _again = pool.acquire_timeout(Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn registry_shares_pools_by_signature() {
        let stats = Arc::new(FactoryStats::default());
        let registry = PoolRegistry::new();

        let pool_a = registry
            .get_or_create(1, || Pool::new(factory(Arc::clone(&stats)), quick_config(0, 2)))
            .unwrap();
        let pool_b = registry
            .get_or_create(1, || panic!("must reuse the registered pool"))
            .unwrap();
        let _conn = pool_b.acquire().unwrap();
        assert_eq!(pool_a.stats().in_use, 1);
        assert_eq!(registry.len(), 1);

        registry
            .get_or_create(2, || Pool::new(factory(Arc::clone(&stats)), quick_config(0, 2)))
            .unwrap();
        assert_eq!(registry.len(), 2);

        registry.remove(1);
        assert!(registry.get(1).is_none());
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn registry_replacement_closes_previous_pool() {
        let stats = Arc::new(FactoryStats::default());
        let registry = PoolRegistry::new();
        let first = registry
            .get_or_create(7, || Pool::new(factory(Arc::clone(&stats)), quick_config(1, 2)))
            .unwrap();

        // Simulate a lost creation race: a second build lands on the same
        // key. The later registration wins; the earlier pool drains.
        let mut map = registry.pools.lock().unwrap();
        let replacement = Pool::new(factory(Arc::clone(&stats)), quick_config(0, 2)).unwrap();
        if let Some(previous) = map.insert(7, replacement) {
            previous.close();
        }
        drop(map);

        assert!(matches!(first.acquire(), Err(Error::Pool(_))));
        assert!(registry.get(7).is_some());
    }

    #[test]
    fn invalid_bounds_rejected() {
        let stats = Arc::new(FactoryStats::default());
        assert!(Pool::new(factory(Arc::clone(&stats)), quick_config(3, 2)).is_err());
        assert!(Pool::new(factory(stats), quick_config(0, 0)).is_err());
    }
}
