//! Session lifecycle and the session registry.
//!
//! A [`Session`] is a configured, resource-bounded processing context. Opening
//! one through a [`SessionRegistry`] validates the configuration, allocates
//! its [`SessionResources`] (a worker pool sized to the concurrency limit plus
//! the admission and memory gates) and registers it. Closing releases the
//! resources and deregisters it; closing is idempotent and dropping an open
//! session closes it.
//!
//! Operations hold an `Arc` to the resources for their duration, so a close
//! racing with an in-flight operation never tears the worker pool down under
//! it. New operations on a closed session fail with
//! [`EngineError::SessionClosed`] before touching any file.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::admission::{BlockAdmission, BlockPermit, MemoryBudget, MemoryReservation};
use crate::config::SessionConfig;
use crate::error::{EngineError, Result};
use crate::planner;

/// Unique, non-zero session handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw handle value
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw handle value
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepting operations
    Open,
    /// Closed; every operation fails
    Closed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resources owned by an open session
pub struct SessionResources {
    config: SessionConfig,
    admission: BlockAdmission,
    memory: MemoryBudget,
    pool: rayon::ThreadPool,
}

impl SessionResources {
    /// Session configuration
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Concurrency gate
    #[must_use]
    pub fn admission(&self) -> &BlockAdmission {
        &self.admission
    }

    /// Memory gate
    #[must_use]
    pub fn memory(&self) -> &MemoryBudget {
        &self.memory
    }

    /// Number of worker threads in the session pool
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `op` inside the session's worker pool
    ///
    /// Parallel iterators used inside `op` execute on the session's threads,
    /// never on more than `concurrency_limit` of them.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }

    /// Admit one block operation with the given memory footprint
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConcurrencyLimitExceeded`] or
    /// [`EngineError::MemoryBudgetExceeded`] if either gate is full.
    pub fn admit_block(&self, footprint: u64) -> Result<BlockGuard> {
        let permit = self.admission.acquire()?;
        let reservation = self.memory.try_reserve(footprint)?;
        Ok(BlockGuard {
            _permit: permit,
            _reservation: reservation,
        })
    }
}

impl fmt::Debug for SessionResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionResources")
            .field("config", &self.config)
            .field("admission", &self.admission)
            .field("memory", &self.memory)
            .field("worker_threads", &self.pool.current_num_threads())
            .finish()
    }
}

/// Admission held for the duration of one block operation
#[derive(Debug)]
pub struct BlockGuard {
    _permit: BlockPermit,
    _reservation: MemoryReservation,
}

/// A configured processing context
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    config: SessionConfig,
    resources: Mutex<Option<Arc<SessionResources>>>,
    registry: SessionRegistry,
}

impl Session {
    /// Session handle
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Session configuration
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        if lock(&self.resources).is_some() {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }

    /// Check if the session accepts operations
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }

    /// Fail fast if the session is closed
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionClosed`] if the session is closed.
    pub fn ensure_open(&self) -> Result<()> {
        self.resources().map(drop)
    }

    /// Resources of an open session
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::SessionClosed`] if the session is closed.
    pub fn resources(&self) -> Result<Arc<SessionResources>> {
        lock(&self.resources)
            .as_ref()
            .map(Arc::clone)
            .ok_or(EngineError::SessionClosed(self.id))
    }

    /// Recommended block size for a file of `file_size` bytes
    ///
    /// Returns 0 if the session is closed; callers treat 0 as "use the
    /// session default", never as a block size.
    #[must_use]
    pub fn recommended_block_size(&self, file_size: u64) -> u64 {
        if !self.is_open() {
            return 0;
        }
        planner::recommended_block_size(&self.config, file_size)
    }

    /// Close the session and release its resources
    ///
    /// Returns `true` on the first call and `false` on every later call,
    /// which has no effect.
    pub fn close(&self) -> bool {
        let Some(resources) = lock(&self.resources).take() else {
            return false;
        };

        self.registry.deregister(self.id);
        tracing::debug!(
            "Closed session {} ({} block operations still in flight)",
            self.id,
            resources.admission.active_count()
        );
        drop(resources);
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.close() {
            tracing::debug!("Session {} closed on drop", self.id);
        }
    }
}

struct RegistryInner {
    next_id: AtomicU64,
    sessions: Mutex<HashMap<SessionId, SessionConfig>>,
}

/// Registry of open sessions
///
/// Cloning yields another handle to the same registry. Registration and
/// deregistration are serialized by a single lock.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                next_id: AtomicU64::new(1),
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Open a session with the given configuration
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if the configuration is invalid,
    /// or [`EngineError::Io`] if the worker pool cannot be started.
    pub fn open(&self, config: SessionConfig) -> Result<Session> {
        config.validate()?;

        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.concurrency_limit)
            .thread_name(move |index| format!("rqblock-s{id}-w{index}"))
            .build()
            .map_err(|e| EngineError::Io(std::io::Error::other(e.to_string())))?;

        let resources = Arc::new(SessionResources {
            admission: BlockAdmission::new(config.concurrency_limit),
            memory: MemoryBudget::new(config.memory_budget),
            pool,
            config: config.clone(),
        });

        lock(&self.inner.sessions).insert(id, config.clone());

        tracing::info!(
            "Opened session {} (symbol_size={}, redundancy_factor={}, memory_budget={}, concurrency_limit={})",
            id,
            config.symbol_size,
            config.redundancy_factor,
            config.memory_budget,
            config.concurrency_limit
        );

        Ok(Session {
            id,
            config,
            resources: Mutex::new(Some(resources)),
            registry: self.clone(),
        })
    }

    /// Open a session with the default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool cannot be started.
    pub fn open_default(&self) -> Result<Session> {
        self.open(SessionConfig::default())
    }

    /// Number of open sessions
    #[must_use]
    pub fn active_count(&self) -> usize {
        lock(&self.inner.sessions).len()
    }

    /// Check if a session is registered
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        lock(&self.inner.sessions).contains_key(&id)
    }

    /// Configuration of a registered session
    #[must_use]
    pub fn config(&self, id: SessionId) -> Option<SessionConfig> {
        lock(&self.inner.sessions).get(&id).cloned()
    }

    fn deregister(&self, id: SessionId) {
        lock(&self.inner.sessions).remove(&id);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("active", &self.active_count())
            .finish()
    }
}
