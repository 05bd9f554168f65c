//! Startup pre-warming and graceful shutdown.
//!
//! Pre-warming creates `INITIAL_POOL_SIZE / len(languages)` sandboxes per
//! language up front (integer division; any remainder is simply not
//! created). Shutdown closes every sandbox the process knows about — idle
//! in the pool, session-bound, or mid-execution in the Active Ephemeral
//! Set — exactly once, after giving in-flight background returns a bounded
//! grace period to finish on their own.

use crate::coordinator::Coordinator;
use crate::language::Language;
use crate::pool::Pool;
use crate::session::SessionRegistry;
use sandbox_provider::SandboxProvider;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Tracks background `Pool::return_and_reset` tasks spawned by the
/// coordinator so shutdown can wait for them instead of racing them.
pub struct ReturnTracker {
    count: AtomicUsize,
    notify: Notify,
}

impl ReturnTracker {
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    pub fn start(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    pub fn outstanding(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub async fn wait_idle(&self) {
        loop {
            let notified = self.notify.notified();
            if self.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl Default for ReturnTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LifecycleController {
    pool: Arc<Pool>,
    sessions: Arc<SessionRegistry>,
    provider: Arc<dyn SandboxProvider>,
    languages: Vec<Language>,
    initial_pool_size: usize,
    returns: Arc<ReturnTracker>,
    shutdown_started: AtomicBool,
}

impl LifecycleController {
    pub fn new(
        pool: Arc<Pool>,
        sessions: Arc<SessionRegistry>,
        provider: Arc<dyn SandboxProvider>,
        languages: Vec<Language>,
        initial_pool_size: usize,
        returns: Arc<ReturnTracker>,
    ) -> Self {
        Self {
            pool,
            sessions,
            provider,
            languages,
            initial_pool_size,
            returns,
            shutdown_started: AtomicBool::new(false),
        }
    }

    /// Creates `initial_pool_size / languages.len()` idle sandboxes per
    /// language. A creation failure for one sandbox is logged and skipped —
    /// pre-warming is best-effort, not a startup precondition.
    pub async fn prewarm(&self) {
        if self.languages.is_empty() {
            return;
        }
        let per_language = self.initial_pool_size / self.languages.len();
        for &language in &self.languages {
            for _ in 0..per_language {
                match self.pool.checkout(language).await {
                    Ok(sandbox) => self.pool.return_without_reset(sandbox).await,
                    Err(e) => {
                        tracing::warn!(%language, error = %e, "pre-warm sandbox creation failed, skipping");
                    }
                }
            }
        }
        tracing::info!(
            live_count = self.pool.live_count().await,
            per_language,
            "pool pre-warm complete"
        );
    }

    /// Idempotent: a second call is a no-op. Waits up to `grace` for
    /// in-flight background pool returns to finish, then closes every idle,
    /// session-bound, and mid-execution sandbox exactly once.
    pub async fn shutdown(&self, coordinator: &Coordinator, grace: Duration) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            tracing::debug!("shutdown already in progress, ignoring duplicate call");
            return;
        }

        if tokio::time::timeout(grace, self.returns.wait_idle()).await.is_err() {
            tracing::warn!(
                outstanding = self.returns.outstanding(),
                "grace period elapsed with background sandbox returns still in flight"
            );
        }

        coordinator.close_active_ephemeral().await;
        self.sessions.close_all(self.provider.as_ref()).await;
        self.pool.close_all_idle().await;
        tracing::info!("shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::HandlerRegistry;
    use sandbox_provider::MockSandboxProvider;

    #[tokio::test]
    async fn prewarm_splits_evenly_and_discards_the_remainder() {
        let provider = Arc::new(MockSandboxProvider::new());
        let pool = Arc::new(Pool::new(provider.clone(), 20));
        let sessions = Arc::new(SessionRegistry::new(pool.clone()));
        let languages = vec![Language::Python, Language::Node, Language::Bash];
        let controller = LifecycleController::new(
            pool.clone(),
            sessions,
            provider.clone(),
            languages.clone(),
            10, // 10 / 3 == 3 per language, 1 discarded
            Arc::new(ReturnTracker::new()),
        );

        controller.prewarm().await;
        assert_eq!(pool.live_count().await, 9);
        for language in languages {
            assert_eq!(pool.idle_count_for(language).await, 3);
        }
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_closes_every_known_sandbox() {
        let provider = Arc::new(MockSandboxProvider::new());
        let pool = Arc::new(Pool::new(provider.clone(), 20));
        let sessions = Arc::new(SessionRegistry::new(pool.clone()));
        let handlers = Arc::new(HandlerRegistry::new());
        let returns = Arc::new(ReturnTracker::new());
        let languages = vec![Language::Python, Language::Node, Language::Bash, Language::C];
        let controller = LifecycleController::new(
            pool.clone(),
            sessions.clone(),
            provider.clone(),
            languages.clone(),
            8,
            returns.clone(),
        );
        controller.prewarm().await;
        let sid = sessions.create("user-1".into(), Language::Python).await.unwrap();

        let coordinator = Coordinator::new(
            pool.clone(),
            sessions.clone(),
            handlers,
            provider.clone(),
            languages,
            300,
            returns,
        );

        controller.shutdown(&coordinator, Duration::from_millis(50)).await;
        controller.shutdown(&coordinator, Duration::from_millis(50)).await;

        assert_eq!(provider.live_count().await, 0);
        let _ = sid; // session's sandbox was among those closed
    }
}
