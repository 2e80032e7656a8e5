//! Bounded connection pool
//!
//! Hands out exclusive backend sessions on demand, lazily grown up to
//! `max_connections`. All bookkeeping runs under one short-lived mutex per
//! pool; session creation happens outside the lock against reserved slots.
//! Blocked acquires poll at a fixed grain and re-check the deadline, so a
//! caller waits at most `timeout_ms` before getting the exhaustion signal.
//!
//! There is no fairness guarantee among waiters: any task that wakes first
//! may win the next available connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use crate::engine::error::{DataSourceError, SourceResult};
use crate::engine::traits::{SessionFactory, SpatialSession};
use crate::engine::types::{ConnectionConfig, ConnectionId};

/// Poll grain for blocked acquires.
const POLL_INTERVAL_MS: u64 = 50;

/// Exclusively-owned handle to one backend session.
///
/// Only one caller holds a given connection at a time; handing it back is
/// done by value through [`ConnectionPool::release`].
pub struct PooledConnection {
    id: ConnectionId,
    session: Arc<dyn SpatialSession>,
}

impl PooledConnection {
    fn new(session: Box<dyn SpatialSession>) -> Self {
        Self {
            id: ConnectionId::new(),
            session: Arc::from(session),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn session(&self) -> &dyn SpatialSession {
        self.session.as_ref()
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Non-fatal acquisition outcome.
///
/// Exhaustion is backpressure, not an error: callers can retry, queue, or
/// surface "busy". Fatal conditions (session creation failure, closed pool)
/// come back as `Err` from [`ConnectionPool::acquire`].
#[derive(Debug)]
pub enum AcquireResult {
    Ready(PooledConnection),
    Exhausted {
        in_use: usize,
        config: ConnectionConfig,
    },
}

struct PoolState {
    available: Vec<PooledConnection>,
    in_use: HashMap<ConnectionId, Arc<dyn SpatialSession>>,
    /// Slots reserved for sessions being created outside the lock; counted
    /// against `max_connections` but not against `size()`.
    pending: usize,
    closed: bool,
}

/// Bounded, lazily-grown pool of backend sessions for one endpoint
pub struct ConnectionPool {
    config: ConnectionConfig,
    factory: Arc<dyn SessionFactory>,
    state: Mutex<PoolState>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool {
    /// Creates the pool and eagerly opens `min_connections` sessions.
    ///
    /// Any creation failure is fatal: the already-created sessions are closed
    /// best-effort and no partially-usable pool remains.
    #[instrument(
        skip(config, factory),
        fields(
            host = %config.server_host,
            port = config.port,
            instance = %config.database_instance,
            user = %config.user_name
        )
    )]
    pub async fn connect(
        config: ConnectionConfig,
        factory: Arc<dyn SessionFactory>,
    ) -> SourceResult<Self> {
        let initial = config.min_connections.min(config.max_connections);
        let mut available = Vec::with_capacity(initial);
        for _ in 0..initial {
            match factory.create_session(&config).await {
                Ok(session) => available.push(PooledConnection::new(session)),
                Err(err) => {
                    for conn in available {
                        if let Err(close_err) = conn.session.close().await {
                            warn!(error = %close_err, "failed to close session while aborting pool construction");
                        }
                    }
                    return Err(DataSourceError::connection_failed(format!(
                        "cannot create initial session for {}@{}:{}: {}",
                        config.user_name, config.server_host, config.port, err
                    )));
                }
            }
        }
        debug!(initial = available.len(), "connection pool ready");
        Ok(Self {
            config,
            factory,
            state: Mutex::new(PoolState {
                available,
                in_use: HashMap::new(),
                pending: 0,
                closed: false,
            }),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Acquires an exclusive connection.
    ///
    /// With no connection available the pool first tries to grow by up to
    /// `increment` sessions (never past `max_connections`); a creation
    /// failure there is fatal and aborts growth. If still dry and `block` is
    /// set, the caller waits, polling at a fixed grain, until a connection
    /// frees up or `timeout_ms` elapses. Exhaustion comes back as
    /// [`AcquireResult::Exhausted`] with the in-use count read under the pool
    /// lock.
    #[instrument(skip(self), fields(host = %self.config.server_host))]
    pub async fn acquire(&self, block: bool) -> SourceResult<AcquireResult> {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let poll = Duration::from_millis(POLL_INTERVAL_MS);
        let mut waited = Duration::ZERO;

        loop {
            let reserve = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(DataSourceError::PoolClosed);
                }
                if state.available.is_empty() {
                    let occupied = state.available.len() + state.in_use.len() + state.pending;
                    let headroom = self.config.max_connections.saturating_sub(occupied);
                    let reserve = self.config.increment.min(headroom);
                    state.pending += reserve;
                    reserve
                } else {
                    0
                }
            };
            if reserve > 0 {
                self.populate(reserve).await?;
            }

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(DataSourceError::PoolClosed);
                }
                if let Some(conn) = state.available.pop() {
                    state.in_use.insert(conn.id, Arc::clone(&conn.session));
                    debug!(connection = %conn.id.0, in_use = state.in_use.len(), "connection acquired");
                    return Ok(AcquireResult::Ready(conn));
                }
                if !block || waited >= timeout {
                    return Ok(AcquireResult::Exhausted {
                        in_use: state.in_use.len(),
                        config: self.config.clone(),
                    });
                }
            }

            let step = poll.min(timeout - waited);
            tokio::time::sleep(step).await;
            waited += step;
        }
    }

    /// Like [`acquire`](Self::acquire) with `block = true`, mapping
    /// exhaustion to the [`DataSourceError::PoolExhausted`] error kind.
    pub async fn acquire_ready(&self) -> SourceResult<PooledConnection> {
        match self.acquire(true).await? {
            AcquireResult::Ready(conn) => Ok(conn),
            AcquireResult::Exhausted { in_use, config } => {
                Err(DataSourceError::PoolExhausted { in_use, config })
            }
        }
    }

    /// Creates `count` sessions against slots already reserved under the
    /// lock. A creation failure releases the untaken reservations and aborts.
    async fn populate(&self, count: usize) -> SourceResult<()> {
        for created in 0..count {
            match self.factory.create_session(&self.config).await {
                Ok(session) => {
                    let conn = PooledConnection::new(session);
                    let leftover = {
                        let mut state = self.state.lock();
                        state.pending -= 1;
                        if state.closed {
                            Some(conn)
                        } else {
                            debug!(connection = %conn.id.0, "pool grown by one session");
                            state.available.push(conn);
                            None
                        }
                    };
                    // Pool was closed while this session was being created.
                    if let Some(conn) = leftover {
                        if let Err(err) = conn.session.close().await {
                            warn!(error = %err, "failed to close session created after pool shutdown");
                        }
                        return Err(DataSourceError::PoolClosed);
                    }
                }
                Err(err) => {
                    let mut state = self.state.lock();
                    state.pending -= count - created;
                    return Err(DataSourceError::connection_failed(format!(
                        "cannot grow pool for {}@{}:{}: {}",
                        self.config.user_name, self.config.server_host, self.config.port, err
                    )));
                }
            }
        }
        Ok(())
    }

    /// Returns a connection to the pool.
    ///
    /// Idempotent and infallible: releasing a connection that is already
    /// available, or one this pool never handed out, is a logged no-op.
    /// Error paths release defensively and must never be punished for it.
    pub fn release(&self, conn: PooledConnection) {
        let mut state = self.state.lock();
        if state.closed {
            debug!(connection = %conn.id.0, "release after pool shutdown; dropping connection");
            return;
        }
        if state.in_use.remove(&conn.id).is_some() {
            debug!(connection = %conn.id.0, in_use = state.in_use.len(), "connection released");
            state.available.push(conn);
        } else if state.available.iter().any(|c| c.id == conn.id) {
            warn!(connection = %conn.id.0, "duplicate release ignored");
        } else {
            warn!(connection = %conn.id.0, "release of foreign connection ignored");
        }
    }

    /// Total connections owned by the pool, available plus in use.
    pub fn size(&self) -> usize {
        let state = self.state.lock();
        state.available.len() + state.in_use.len()
    }

    pub fn available_count(&self) -> usize {
        self.state.lock().available.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.state.lock().in_use.len()
    }

    /// Drains both collections and best-effort closes every session. After
    /// this every acquire fails with [`DataSourceError::PoolClosed`].
    #[instrument(skip(self), fields(host = %self.config.server_host))]
    pub async fn close_all(&self) {
        let (available, in_use) = {
            let mut state = self.state.lock();
            state.closed = true;
            (
                std::mem::take(&mut state.available),
                std::mem::take(&mut state.in_use),
            )
        };
        for conn in available {
            if let Err(err) = conn.session.close().await {
                warn!(connection = %conn.id.0, error = %err, "failed to close pooled session");
            }
        }
        for (id, session) in in_use {
            if let Err(err) = session.close().await {
                warn!(connection = %id.0, error = %err, "failed to close in-use session");
            }
        }
        debug!("connection pool closed");
    }
}

#[cfg(test)]
impl ConnectionPool {
    /// Test-only: forges a second handle with the same identity, to exercise
    /// the duplicate-release path that move semantics otherwise rule out.
    pub(crate) fn forge_handle(&self, conn: &PooledConnection) -> PooledConnection {
        PooledConnection {
            id: conn.id,
            session: Arc::clone(&conn.session),
        }
    }

    pub(crate) fn is_available(&self, id: ConnectionId) -> bool {
        self.state.lock().available.iter().any(|c| c.id == id)
    }
}
