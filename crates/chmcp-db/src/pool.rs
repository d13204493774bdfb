//! Async bounded session pool with idle and lifetime limits.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, sleep};

pub type FactoryFuture<T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on sessions that exist at once, idle or checked out.
    pub max_open: usize,
    /// Sessions beyond this many are closed instead of parked.
    pub max_idle: usize,
    pub max_lifetime: Option<Duration>,
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open: 10,
            max_idle: 5,
            max_lifetime: Some(Duration::from_secs(10 * 60)),
            acquire_timeout: Some(Duration::from_secs(5)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error("timed out waiting for a free session")]
    Timeout,
    #[error("cancelled while waiting for a session")]
    Cancelled,
    #[error("pool is closed")]
    Closed,
    #[error("failed to open session: {0}")]
    Create(String),
}

#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

struct CancelState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent cancel is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct IdleSlot<T> {
    value: T,
    created_at: Instant,
}

struct PoolState<T> {
    idle: Vec<IdleSlot<T>>,
}

/// An async bounded pool for session-like objects.
pub struct AsyncPool<T> {
    config: PoolConfig,
    factory: Box<dyn Fn() -> FactoryFuture<T> + Send + Sync>,
    state: Mutex<PoolState<T>>,
    available: Notify,
    open: AtomicUsize,
    closed: AtomicBool,
}

/// A checked-out value that returns to the pool on drop.
pub struct Pooled<T> {
    pool: Arc<AsyncPool<T>>,
    value: Option<T>,
    created_at: Instant,
}

impl<T> AsyncPool<T> {
    pub fn new<F, Fut, E>(config: PoolConfig, factory: F) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let factory = Box::new(move || {
            let fut = factory();
            Box::pin(async move { fut.await.map_err(|err| err.to_string()) }) as FactoryFuture<T>
        });
        let config = PoolConfig {
            max_open: config.max_open.max(1),
            ..config
        };
        Arc::new(Self {
            config,
            factory,
            state: Mutex::new(PoolState { idle: Vec::new() }),
            available: Notify::new(),
            open: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, created_at: Instant) -> bool {
        self.config
            .max_lifetime
            .is_some_and(|lifetime| created_at.elapsed() >= lifetime)
    }

    fn try_reserve(&self) -> bool {
        self.open
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |open| {
                (open < self.config.max_open).then_some(open + 1)
            })
            .is_ok()
    }

    pub async fn acquire(
        self: &Arc<Self>,
        cancel: Option<&CancelToken>,
    ) -> Result<Pooled<T>, AcquireError> {
        let deadline = self.config.acquire_timeout.map(|limit| Instant::now() + limit);
        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(AcquireError::Cancelled);
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(AcquireError::Closed);
            }
            let slot = {
                let mut state = self.lock_state();
                state.idle.pop()
            };
            if let Some(slot) = slot {
                if self.is_expired(slot.created_at) {
                    drop(slot);
                    self.forget_one();
                    continue;
                }
                return Ok(Pooled {
                    pool: Arc::clone(self),
                    value: Some(slot.value),
                    created_at: slot.created_at,
                });
            }
            if self.try_reserve() {
                match (self.factory)().await {
                    Ok(value) => {
                        return Ok(Pooled {
                            pool: Arc::clone(self),
                            value: Some(value),
                            created_at: Instant::now(),
                        });
                    }
                    Err(err) => {
                        self.forget_one();
                        return Err(AcquireError::Create(err));
                    }
                }
            }

            let wait = match deadline {
                None => None,
                Some(limit) => {
                    let now = Instant::now();
                    if now >= limit {
                        return Err(AcquireError::Timeout);
                    }
                    Some(limit - now)
                }
            };

            match (cancel, wait) {
                (Some(token), Some(duration)) => {
                    tokio::select! {
                        _ = self.available.notified() => {},
                        _ = token.cancelled() => return Err(AcquireError::Cancelled),
                        _ = sleep(duration) => return Err(AcquireError::Timeout),
                    }
                }
                (Some(token), None) => {
                    tokio::select! {
                        _ = self.available.notified() => {},
                        _ = token.cancelled() => return Err(AcquireError::Cancelled),
                    }
                }
                (None, Some(duration)) => {
                    tokio::select! {
                        _ = self.available.notified() => {},
                        _ = sleep(duration) => return Err(AcquireError::Timeout),
                    }
                }
                (None, None) => {
                    self.available.notified().await;
                }
            }
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn idle_count(&self) -> usize {
        self.lock_state().idle.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Drops idle sessions and refuses new checkouts. Checked-out sessions are
    /// closed when they come back.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained = {
            let mut state = self.lock_state();
            std::mem::take(&mut state.idle)
        };
        self.open.fetch_sub(drained.len(), Ordering::SeqCst);
        drop(drained);
        self.available.notify_waiters();
    }

    fn release(&self, value: T, created_at: Instant) {
        if self.closed.load(Ordering::SeqCst) || self.is_expired(created_at) {
            drop(value);
            self.forget_one();
            return;
        }
        let mut state = self.lock_state();
        if state.idle.len() >= self.config.max_idle {
            drop(state);
            drop(value);
            self.forget_one();
            return;
        }
        state.idle.push(IdleSlot { value, created_at });
        drop(state);
        self.available.notify_one();
    }

    fn forget_one(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        self.available.notify_one();
    }
}

impl<T> Pooled<T> {
    /// Closes the session instead of returning it, freeing its slot.
    pub fn discard(mut self) {
        if self.value.take().is_some() {
            self.pool.forget_one();
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl<T> AsRef<T> for Pooled<T> {
    fn as_ref(&self) -> &T {
        self.value
            .as_ref()
            .expect("Pooled value missing (already released)")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.pool.release(value, self.created_at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn config(max_open: usize, max_idle: usize) -> PoolConfig {
        PoolConfig {
            max_open,
            max_idle,
            max_lifetime: None,
            acquire_timeout: Some(Duration::from_millis(20)),
        }
    }

    fn counting_pool(cfg: PoolConfig) -> (Arc<AsyncPool<u32>>, Arc<AtomicU32>) {
        let created = Arc::new(AtomicU32::new(0));
        let counter = created.clone();
        let pool = AsyncPool::new(cfg, move || {
            let id = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, std::io::Error>(id) }
        });
        (pool, created)
    }

    #[tokio::test]
    async fn pool_reuses_sessions() {
        let (pool, created) = counting_pool(config(2, 2));
        let first = pool.acquire(None).await.expect("first");
        let second = pool.acquire(None).await.expect("second");
        assert_eq!(pool.open_count(), 2);
        drop(first);
        assert_eq!(pool.idle_count(), 1);
        drop(second);
        assert_eq!(pool.idle_count(), 2);
        let _third = pool.acquire(None).await.expect("third");
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pool_times_out_when_exhausted() {
        let (pool, _) = counting_pool(config(1, 1));
        let _guard = pool.acquire(None).await.expect("guard");
        let result = pool.acquire(None).await;
        assert_eq!(result.err(), Some(AcquireError::Timeout));
    }

    #[tokio::test]
    async fn pool_wakes_waiter_on_release() {
        let (pool, _) = counting_pool(PoolConfig {
            acquire_timeout: Some(Duration::from_secs(2)),
            ..config(1, 1)
        });
        let guard = pool.acquire(None).await.expect("guard");
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(None).await.map(|s| *s.as_ref()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);
        let reused = waiter.await.expect("join").expect("acquire");
        assert_eq!(reused, 0);
    }

    #[tokio::test]
    async fn pool_cancelled_acquire() {
        let (pool, _) = counting_pool(config(1, 1));
        let _guard = pool.acquire(None).await.expect("guard");
        let token = CancelToken::new();
        token.cancel();
        let result = pool.acquire(Some(&token)).await;
        assert_eq!(result.err(), Some(AcquireError::Cancelled));
    }

    #[tokio::test]
    async fn pool_closes_sessions_beyond_idle_limit() {
        let (pool, _) = counting_pool(config(3, 1));
        let a = pool.acquire(None).await.expect("a");
        let b = pool.acquire(None).await.expect("b");
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.open_count(), 1);
    }

    #[tokio::test]
    async fn pool_retires_expired_sessions() {
        let (pool, created) = counting_pool(PoolConfig {
            max_lifetime: Some(Duration::from_millis(5)),
            ..config(1, 1)
        });
        let first = pool.acquire(None).await.expect("first");
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(first);
        assert_eq!(pool.idle_count(), 0);
        let second = pool.acquire(None).await.expect("second");
        assert_eq!(*second.as_ref(), 1);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pool_discard_allows_recreate() {
        let (pool, _) = counting_pool(config(1, 1));
        let guard = pool.acquire(None).await.expect("guard");
        guard.discard();
        assert_eq!(pool.open_count(), 0);
        let next = pool.acquire(None).await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn pool_reports_factory_failure() {
        let pool: Arc<AsyncPool<u32>> = AsyncPool::new(config(1, 1), || async {
            Err::<u32, _>("refused")
        });
        let result = pool.acquire(None).await;
        assert_eq!(result.err(), Some(AcquireError::Create("refused".into())));
        assert_eq!(pool.open_count(), 0);
    }

    #[tokio::test]
    async fn closed_pool_refuses_checkout() {
        let (pool, _) = counting_pool(config(2, 2));
        let held = pool.acquire(None).await.expect("held");
        pool.close();
        assert_eq!(pool.acquire(None).await.err(), Some(AcquireError::Closed));
        drop(held);
        assert_eq!(pool.open_count(), 0);
        assert_eq!(pool.idle_count(), 0);
    }
}
