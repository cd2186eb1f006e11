//! Session lifecycle: single-flight creation, lease-based release, cleanup.
//!
//! One [`SessionManager`] caches at most one reusable remote session per
//! client. Concurrent [`SessionManager::acquire`] calls share a single
//! in-flight creation future, so the remote side sees exactly one creation
//! request no matter how many callers race. The table lock is a plain
//! `std::sync::Mutex` and is never held across an `.await`.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::SteelError;
use crate::logging::{SteelLogger, category};
use crate::metrics::{MetricsRecorder, SteelOperation, elapsed_ms, start_timer};
use crate::retry::{RetryController, RetryPolicy};
use crate::types::session::{SessionHandle, SessionLease, SessionState};

/// Remote close is attempted at most this many times before giving up.
const CLOSE_ATTEMPTS: u32 = 3;

/// Remote session endpoints the manager depends on.
#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn create_session(&self) -> Result<SessionHandle, SteelError>;
    async fn close_session(&self, session_id: &str) -> Result<(), SteelError>;
}

type Creation = Shared<BoxFuture<'static, Result<SessionHandle, SteelError>>>;

struct Slot {
    handle: SessionHandle,
    leases: HashSet<u64>,
    state: SessionState,
    idle_since: Option<Instant>,
}

impl Slot {
    fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            leases: HashSet::new(),
            state: SessionState::Active,
            idle_since: None,
        }
    }
}

enum Current {
    Empty(SessionState),
    Creating { generation: u64, creation: Creation },
    Ready(Slot),
}

/// What `close_session` found in the cache.
enum PendingClose {
    Cached(SessionHandle),
    InFlight { generation: u64, creation: Creation },
}

/// An expired slot taken out of the cache.
struct Retirement {
    session_id: String,
    /// Set when no lease holds the handle and it can be closed right away.
    close_now: Option<SessionHandle>,
}

struct Table {
    current: Current,
    /// Expired handles still held by leases; closed when the last one goes.
    retired: HashMap<String, Slot>,
    next_lease: u64,
    next_generation: u64,
}

impl Table {
    fn lease(&mut self, slot_id: &str) -> Option<SessionLease> {
        let id = self.next_lease;
        let Current::Ready(slot) = &mut self.current else {
            return None;
        };
        if slot.handle.id != slot_id {
            return None;
        }
        self.next_lease += 1;
        slot.leases.insert(id);
        slot.state = SessionState::Active;
        slot.idle_since = None;
        Some(SessionLease {
            id,
            handle: slot.handle.clone(),
        })
    }

    /// Drop `lease`; returns the handle when it is now due for remote close.
    fn release(&mut self, lease: &SessionLease, idle_timeout: Duration) -> Option<SessionHandle> {
        if let Current::Ready(slot) = &mut self.current {
            if slot.handle.id == lease.handle.id {
                if !slot.leases.remove(&lease.id) || !slot.leases.is_empty() {
                    return None;
                }
                if idle_timeout.is_zero() || slot.handle.is_expired() {
                    let handle = slot.handle.clone();
                    self.current = Current::Empty(SessionState::Closed);
                    return Some(handle);
                }
                slot.state = SessionState::Expiring;
                slot.idle_since = Some(Instant::now());
                return None;
            }
        }

        let slot = self.retired.get_mut(&lease.handle.id)?;
        if !slot.leases.remove(&lease.id) || !slot.leases.is_empty() {
            return None;
        }
        self.retired
            .remove(&lease.handle.id)
            .map(|slot| slot.handle)
    }
}

/// Snapshot of the manager's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: Option<String>,
    pub state: SessionState,
    pub leases: usize,
    pub retired: usize,
}

struct Inner {
    api: Arc<dyn SessionApi>,
    retry: RetryController,
    close_retry: RetryController,
    logger: SteelLogger,
    metrics: MetricsRecorder,
    idle_timeout: Duration,
    table: Mutex<Table>,
}

/// Creates, shares and tears down the client's remote session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        api: Arc<dyn SessionApi>,
        retry: RetryPolicy,
        idle_timeout: Duration,
        logger: SteelLogger,
    ) -> Self {
        Self::with_metrics(api, retry, idle_timeout, logger, MetricsRecorder::default())
    }

    pub(crate) fn with_metrics(
        api: Arc<dyn SessionApi>,
        retry: RetryPolicy,
        idle_timeout: Duration,
        logger: SteelLogger,
        metrics: MetricsRecorder,
    ) -> Self {
        let close_policy = RetryPolicy {
            max_attempts: CLOSE_ATTEMPTS,
            ..retry.clone()
        };
        Self {
            inner: Arc::new(Inner {
                api,
                retry: RetryController::new(retry, logger.clone()),
                close_retry: RetryController::new(close_policy, logger.clone()),
                logger,
                metrics,
                idle_timeout,
                table: Mutex::new(Table {
                    current: Current::Empty(SessionState::Absent),
                    retired: HashMap::new(),
                    next_lease: 1,
                    next_generation: 1,
                }),
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn acquire(&self) -> Result<SessionLease, SteelError> {
        self.acquire_cancellable(&CancellationToken::new()).await
    }

    /// Lease the cached session, creating one if needed.
    ///
    /// Cancelling only abandons this caller's wait; a creation already in
    /// flight keeps going for the other waiters.
    pub async fn acquire_cancellable(
        &self,
        cancel: &CancellationToken,
    ) -> Result<SessionLease, SteelError> {
        loop {
            let (generation, creation, retired) = {
                let mut table = self.table();
                let live = match &table.current {
                    Current::Ready(slot) if !slot.handle.is_expired() => Some(slot.handle.id.clone()),
                    _ => None,
                };
                if let Some(lease) = live.and_then(|id| table.lease(&id)) {
                    return Ok(lease);
                }
                let retired = Self::retire_current(&mut table);

                match &table.current {
                    Current::Creating {
                        generation,
                        creation,
                    } => (*generation, creation.clone(), retired),
                    _ => {
                        let generation = table.next_generation;
                        table.next_generation += 1;
                        let creation = self.start_creation();
                        table.current = Current::Creating {
                            generation,
                            creation: creation.clone(),
                        };
                        (generation, creation, retired)
                    }
                }
            };

            if let Some(retirement) = retired {
                self.finish_retirement(retirement).await;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SteelError::Cancelled),
                outcome = creation => outcome,
            };

            let (created, lease) = {
                let mut table = self.table();
                let is_ours = matches!(
                    &table.current,
                    Current::Creating { generation: g, .. } if *g == generation
                );
                match outcome {
                    Ok(handle) => {
                        if is_ours {
                            table.current = Current::Ready(Slot::new(handle.clone()));
                        }
                        let lease = table.lease(&handle.id);
                        (is_ours.then_some(handle), lease)
                    }
                    Err(err) => {
                        if is_ours {
                            table.current = Current::Empty(SessionState::Absent);
                        }
                        return Err(err);
                    }
                }
            };

            if let Some(handle) = created {
                self.inner.logger.info(
                    format!("created Steel session {}", handle.id),
                    Some(category::SESSION),
                    Some(json!({ "session_id": handle.id, "expires_at": handle.expires_at })),
                );
            }
            if let Some(lease) = lease {
                return Ok(lease);
            }
            // the table moved on (closed or replaced) while we waited
        }
    }

    /// Move an expired cached slot out of the way.
    fn retire_current(table: &mut Table) -> Option<Retirement> {
        let previous = std::mem::replace(&mut table.current, Current::Empty(SessionState::Absent));
        let Current::Ready(mut slot) = previous else {
            table.current = previous;
            return None;
        };

        let session_id = slot.handle.id.clone();
        if slot.leases.is_empty() {
            table.current = Current::Empty(SessionState::Closed);
            Some(Retirement {
                session_id,
                close_now: Some(slot.handle),
            })
        } else {
            slot.state = SessionState::Expiring;
            table.retired.insert(session_id.clone(), slot);
            Some(Retirement {
                session_id,
                close_now: None,
            })
        }
    }

    /// Log a retirement and close the handle if nothing holds it. Runs
    /// after the table lock is gone so log callbacks may query the manager.
    async fn finish_retirement(&self, retirement: Retirement) {
        self.inner.logger.debug(
            format!("retiring Steel session {}", retirement.session_id),
            Some(category::SESSION),
            None,
        );
        if let Some(handle) = retirement.close_now {
            self.close_remote(&handle).await;
        }
    }

    fn start_creation(&self) -> Creation {
        let api = Arc::clone(&self.inner.api);
        let retry = self.inner.retry.clone();
        let metrics = self.inner.metrics.clone();
        async move {
            let timer = start_timer();
            let cancel = CancellationToken::new();
            let result = retry
                .run("create_session", &cancel, |_| {
                    let api = Arc::clone(&api);
                    async move { api.create_session().await }
                })
                .await;
            let (attempts, failed) = match &result {
                Ok(outcome) => (outcome.attempts, false),
                Err(err) => (err.attempts().unwrap_or(1), true),
            };
            metrics.record(SteelOperation::CreateSession, attempts, failed, elapsed_ms(timer));
            result.map(|outcome| outcome.value)
        }
        .boxed()
        .shared()
    }

    /// Release a lease. Never fails; releasing the same lease twice does nothing.
    pub async fn release(&self, lease: &SessionLease) {
        if let Some(handle) = self.release_local(lease) {
            self.close_remote(&handle).await;
        }
    }

    /// Synchronous half of [`SessionManager::release`]: returns the handle
    /// when it must now be closed remotely.
    pub(crate) fn release_local(&self, lease: &SessionLease) -> Option<SessionHandle> {
        let due = self.table().release(lease, self.inner.idle_timeout);
        if due.is_none() {
            self.inner.logger.debug(
                format!("released lease on Steel session {}", lease.session_id()),
                Some(category::SESSION),
                None,
            );
        }
        due
    }

    /// Acquire a session for the duration of `work`, releasing it on every exit path.
    ///
    /// If the returned future is dropped mid-flight the lease is still
    /// released; any remote close that becomes due is spawned onto the
    /// current runtime.
    pub async fn scoped<T, E, F, Fut>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SteelError>,
    {
        self.scoped_cancellable(&CancellationToken::new(), work)
            .await
    }

    /// [`SessionManager::scoped`] whose acquisition can be cancelled.
    pub async fn scoped_cancellable<T, E, F, Fut>(
        &self,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<SteelError>,
    {
        let lease = self.acquire_cancellable(cancel).await.map_err(E::from)?;
        let mut guard = LeaseGuard {
            manager: self.clone(),
            lease: Some(lease.clone()),
        };

        let result = work(lease.handle().clone()).await;

        if let Some(lease) = guard.lease.take() {
            self.release(&lease).await;
        }
        result
    }

    /// Force-close the cached session regardless of outstanding leases.
    ///
    /// A creation still in flight is awaited and its session closed on
    /// arrival; callers waiting on that creation go on to start a fresh one.
    /// Returns whether a session was closed; calling it again is a no-op.
    pub async fn close_session(&self) -> bool {
        let pending = {
            let mut table = self.table();
            match std::mem::replace(&mut table.current, Current::Empty(SessionState::Closed)) {
                Current::Ready(slot) => PendingClose::Cached(slot.handle),
                Current::Empty(previous) => {
                    table.current = Current::Empty(previous);
                    return false;
                }
                Current::Creating {
                    generation,
                    creation,
                } => {
                    table.current = Current::Creating {
                        generation,
                        creation: creation.clone(),
                    };
                    PendingClose::InFlight {
                        generation,
                        creation,
                    }
                }
            }
        };

        let handle = match pending {
            PendingClose::Cached(handle) => handle,
            PendingClose::InFlight {
                generation,
                creation,
            } => {
                let Ok(handle) = creation.await else {
                    return false;
                };
                let mut table = self.table();
                let claimed = match &table.current {
                    Current::Creating { generation: g, .. } => *g == generation,
                    Current::Ready(slot) => slot.handle.id == handle.id,
                    Current::Empty(_) => false,
                };
                if !claimed {
                    return false;
                }
                table.current = Current::Empty(SessionState::Closed);
                handle
            }
        };

        self.close_remote(&handle).await;
        true
    }

    /// Close the cached session if it sat idle past the threshold or expired.
    /// Returns the number of sessions closed.
    pub async fn cleanup_expired(&self) -> usize {
        let due = {
            let mut table = self.table();
            let idle_timeout = self.inner.idle_timeout;
            let close = match &table.current {
                Current::Ready(slot) if slot.leases.is_empty() => {
                    slot.handle.is_expired()
                        || slot
                            .idle_since
                            .is_some_and(|since| since.elapsed() >= idle_timeout)
                }
                Current::Ready(slot) => slot.handle.is_expired(),
                _ => false,
            };
            if close {
                Self::retire_current(&mut table)
            } else {
                None
            }
        };

        match due {
            Some(retirement) => {
                let closed = usize::from(retirement.close_now.is_some());
                self.finish_retirement(retirement).await;
                closed
            }
            None => 0,
        }
    }

    /// Current lifecycle state of the cached session.
    pub fn state(&self) -> SessionState {
        match &self.table().current {
            Current::Empty(state) => *state,
            Current::Creating { .. } => SessionState::Creating,
            Current::Ready(slot) if slot.handle.is_expired() => SessionState::Expiring,
            Current::Ready(slot) => slot.state,
        }
    }

    /// State of a specific session, including retired ones.
    pub fn state_of(&self, session_id: &str) -> SessionState {
        let table = self.table();
        if let Current::Ready(slot) = &table.current {
            if slot.handle.id == session_id {
                if slot.handle.is_expired() {
                    return SessionState::Expiring;
                }
                return slot.state;
            }
        }
        if table.retired.contains_key(session_id) {
            return SessionState::Expiring;
        }
        SessionState::Closed
    }

    pub fn stats(&self) -> SessionStats {
        let state = self.state();
        let table = self.table();
        let (session_id, leases) = match &table.current {
            Current::Ready(slot) => (Some(slot.handle.id.clone()), slot.leases.len()),
            _ => (None, 0),
        };
        SessionStats {
            session_id,
            state,
            leases,
            retired: table.retired.len(),
        }
    }

    /// Remote close with bounded attempts; failures are logged, never returned.
    async fn close_remote(&self, handle: &SessionHandle) {
        let timer = start_timer();
        let api = Arc::clone(&self.inner.api);
        let result = self
            .inner
            .close_retry
            .run("close_session", &CancellationToken::new(), |_| {
                let api = Arc::clone(&api);
                let id = handle.id.clone();
                async move { api.close_session(&id).await }
            })
            .await;

        match result {
            Ok(outcome) => {
                self.inner.metrics.record(
                    SteelOperation::CloseSession,
                    outcome.attempts,
                    false,
                    elapsed_ms(timer),
                );
                self.inner.logger.info(
                    format!("closed Steel session {}", handle.id),
                    Some(category::SESSION),
                    None,
                );
            }
            Err(err) => {
                self.inner.metrics.record(
                    SteelOperation::CloseSession,
                    err.attempts().unwrap_or(1),
                    true,
                    elapsed_ms(timer),
                );
                self.inner.logger.warn(
                    format!(
                        "failed to close Steel session {}; leaving it to expire remotely: {err}",
                        handle.id
                    ),
                    Some(category::SESSION),
                    Some(json!({ "session_id": handle.id, "kind": err.kind() })),
                );
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("stats", &self.stats())
            .field("idle_timeout", &self.inner.idle_timeout)
            .finish()
    }
}

/// Releases a scoped lease if the owning future is dropped before completion.
struct LeaseGuard {
    manager: SessionManager,
    lease: Option<SessionLease>,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        let Some(handle) = self.manager.release_local(&lease) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let manager = self.manager.clone();
                runtime.spawn(async move { manager.close_remote(&handle).await });
            }
            Err(_) => self.manager.inner.logger.warn(
                format!(
                    "no runtime to close Steel session {}; leaving it to expire remotely",
                    handle.id
                ),
                Some(category::SESSION),
                None,
            ),
        }
    }
}
