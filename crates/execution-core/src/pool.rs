//! Per-language FIFO pool of idle, pre-warmed sandboxes, with a global
//! live-count cap.

use crate::error::PoolError;
use crate::language::Language;
use sandbox_provider::{SandboxId, SandboxProvider};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// The reset command run between tenants: wipes the writable scratch areas
/// only. Broader isolation policy is a decision external to the pool.
pub const RESET_COMMAND: &str = "rm -rf /tmp/* /home/*/* 2>/dev/null; true";

/// The core-owned record attached to a provider-opaque [`SandboxId`].
/// Kept separately instead of stamping metadata onto a provider object,
/// since providers are free to represent sandboxes however they like.
#[derive(Debug, Clone)]
pub struct SandboxMeta {
    pub language: Language,
    pub owning_session_id: Option<String>,
    pub owning_user_id: Option<String>,
    pub created_at: Instant,
}

impl SandboxMeta {
    fn new(language: Language) -> Self {
        Self {
            language,
            owning_session_id: None,
            owning_user_id: None,
            created_at: Instant::now(),
        }
    }
}

/// A sandbox the caller currently owns, outside any pool queue.
#[derive(Debug, Clone)]
pub struct CheckedOutSandbox {
    pub id: SandboxId,
    pub meta: SandboxMeta,
}

#[derive(Default)]
struct PoolInner {
    queues: HashMap<Language, VecDeque<CheckedOutSandbox>>,
    live_count: usize,
}

/// The sandbox pool: checkout / return / reset / discard, bounded by
/// `MAX_POOL_SIZE`. Holds its mutex only across bookkeeping, never across
/// provider I/O (create / reset / close all happen with the lock released).
pub struct Pool {
    provider: Arc<dyn SandboxProvider>,
    max_size: usize,
    inner: Mutex<PoolInner>,
}

impl Pool {
    pub fn new(provider: Arc<dyn SandboxProvider>, max_size: usize) -> Self {
        Self {
            provider,
            max_size,
            inner: Mutex::new(PoolInner::default()),
        }
    }

    /// Total sandboxes created-minus-closed, regardless of where they live
    /// (idle in a queue, checked out, or session-bound — callers that track
    /// sandboxes outside the pool must account for them separately; this
    /// count only reflects what the pool itself has created and not yet
    /// discarded/returned-by-others is wrong to assume — see `note_created`).
    pub async fn live_count(&self) -> usize {
        self.inner.lock().await.live_count
    }

    /// Sandboxes sitting idle across all language queues.
    pub async fn idle_count(&self) -> usize {
        self.inner.lock().await.queues.values().map(VecDeque::len).sum()
    }

    /// Idle count for a single language queue (used to assert FIFO order in
    /// tests without reaching into private state).
    pub async fn idle_count_for(&self, language: Language) -> usize {
        self.inner
            .lock()
            .await
            .queues
            .get(&language)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Return an idle sandbox for `language` if one is queued; otherwise
    /// create one, provided the live cap allows it.
    pub async fn checkout(&self, language: Language) -> Result<CheckedOutSandbox, PoolError> {
        {
            let mut inner = self.inner.lock().await;
            if let Some(sb) = inner.queues.entry(language).or_default().pop_front() {
                return Ok(sb);
            }
            if inner.live_count >= self.max_size {
                return Err(PoolError::NoCapacity);
            }
            // Reserve the slot before releasing the lock so a concurrent
            // checkout can't also observe spare capacity and over-create.
            inner.live_count += 1;
        }

        match self.provider.create().await {
            Ok(id) => Ok(CheckedOutSandbox {
                id,
                meta: SandboxMeta::new(language),
            }),
            Err(e) => {
                tracing::error!(error = %e, %language, "sandbox provider refused to create sandbox");
                let mut inner = self.inner.lock().await;
                inner.live_count -= 1;
                Err(PoolError::NoCapacity)
            }
        }
    }

    /// Reset a sandbox and, on success, enqueue it at the tail of its
    /// language's idle queue. Reset is best-effort: any failure discards
    /// the sandbox instead of returning it.
    pub async fn return_and_reset(&self, sandbox: CheckedOutSandbox) {
        let language = sandbox.meta.language;
        match self.provider.run_shell(sandbox.id, RESET_COMMAND).await {
            Ok(out) if out.exit_code == 0 => {
                let mut inner = self.inner.lock().await;
                inner.queues.entry(language).or_default().push_back(sandbox);
            }
            Ok(out) => {
                tracing::warn!(exit_code = out.exit_code, stderr = %out.stderr, %language, "sandbox reset returned non-zero, discarding");
                self.close_and_decrement(sandbox.id).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, %language, "sandbox reset failed, discarding");
                self.close_and_decrement(sandbox.id).await;
            }
        }
    }

    /// Enqueue a sandbox without resetting it first. Used for pre-warmed
    /// sandboxes fresh from the provider, which have never run tenant code.
    pub async fn return_without_reset(&self, sandbox: CheckedOutSandbox) {
        let language = sandbox.meta.language;
        let mut inner = self.inner.lock().await;
        inner.queues.entry(language).or_default().push_back(sandbox);
    }

    /// Close a sandbox outright and drop it from the live count, without
    /// ever returning it to a queue.
    pub async fn discard(&self, id: SandboxId) {
        self.close_and_decrement(id).await;
    }

    async fn close_and_decrement(&self, id: SandboxId) {
        if let Err(e) = self.provider.close(id).await {
            tracing::warn!(error = %e, %id, "error closing sandbox during discard");
        }
        let mut inner = self.inner.lock().await;
        inner.live_count = inner.live_count.saturating_sub(1);
    }

    /// Drain every idle sandbox across all languages, closing each exactly
    /// once. Used by the lifecycle controller on shutdown.
    pub async fn close_all_idle(&self) {
        let drained: Vec<CheckedOutSandbox> = {
            let mut inner = self.inner.lock().await;
            inner.queues.values_mut().flat_map(|q| q.drain(..)).collect()
        };
        for sandbox in drained {
            if let Err(e) = self.provider.close(sandbox.id).await {
                tracing::warn!(error = %e, id = %sandbox.id, "error closing idle sandbox on shutdown");
            }
            let mut inner = self.inner.lock().await;
            inner.live_count = inner.live_count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_provider::MockSandboxProvider;

    fn pool(max: usize) -> (Pool, Arc<MockSandboxProvider>) {
        let provider = Arc::new(MockSandboxProvider::new());
        (Pool::new(provider.clone(), max), provider)
    }

    #[tokio::test]
    async fn checkout_creates_on_empty_queue_and_caps_at_max_size() {
        let (pool, _provider) = pool(1);
        let sb = pool.checkout(Language::Python).await.expect("first checkout succeeds");
        assert_eq!(pool.live_count().await, 1);

        let err = pool.checkout(Language::Python).await;
        assert!(matches!(err, Err(PoolError::NoCapacity)));

        pool.return_and_reset(sb).await;
        assert_eq!(pool.live_count().await, 1);
        assert_eq!(pool.idle_count().await, 1);
    }

    #[tokio::test]
    async fn fifo_within_a_language_queue() {
        let (pool, _provider) = pool(10);
        let a = pool.checkout(Language::Bash).await.unwrap();
        let b = pool.checkout(Language::Bash).await.unwrap();
        let a_id = a.id;
        let b_id = b.id;

        pool.return_and_reset(a).await;
        pool.return_and_reset(b).await;

        let first = pool.checkout(Language::Bash).await.unwrap();
        assert_eq!(first.id, a_id);
        let second = pool.checkout(Language::Bash).await.unwrap();
        assert_eq!(second.id, b_id);
    }

    #[tokio::test]
    async fn reset_failure_discards_instead_of_returning() {
        let provider = Arc::new(MockSandboxProvider::new());
        let pool = Pool::new(provider.clone(), 5);
        let sb = pool.checkout(Language::Python).await.unwrap();
        // Close the sandbox out from under the pool so the reset shell call fails.
        provider.close(sb.id).await.unwrap();

        pool.return_and_reset(sb).await;
        assert_eq!(pool.idle_count().await, 0);
        assert_eq!(pool.live_count().await, 0);
    }

    #[tokio::test]
    async fn creation_refusal_surfaces_as_no_capacity_and_does_not_leak_a_reservation() {
        let provider = Arc::new(MockSandboxProvider::new());
        provider.poison_creation();
        let pool = Pool::new(provider, 5);

        let err = pool.checkout(Language::C).await;
        assert!(matches!(err, Err(PoolError::NoCapacity)));
        assert_eq!(pool.live_count().await, 0);
    }
}
