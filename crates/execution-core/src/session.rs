//! Long-lived bindings of `session_id -> sandbox`, with a reverse
//! `user_id -> {session_id}` index.

use crate::error::ExecutionError;
use crate::language::Language;
use crate::pool::Pool;
use sandbox_provider::SandboxId;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// A session-bound sandbox plus the lock the coordinator holds for the
/// duration of file staging + execution, so concurrent `execute` calls on
/// the same session serialise behind it. Lives embedded in the entry rather
/// than a secondary per-session-id lock table.
pub struct SessionEntry {
    pub id: String,
    pub sandbox_id: SandboxId,
    pub language: Language,
    pub user_id: String,
    pub created_at: Instant,
    pub exec_lock: AsyncMutex<()>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, Arc<SessionEntry>>,
    user_index: HashMap<String, HashSet<String>>,
}

pub struct SessionRegistry {
    pool: Arc<Pool>,
    inner: AsyncMutex<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self {
            pool,
            inner: AsyncMutex::new(RegistryInner::default()),
        }
    }

    pub async fn create(&self, user_id: String, language: Language) -> Result<String, ExecutionError> {
        let checked_out = self
            .pool
            .checkout(language)
            .await
            .map_err(|_| ExecutionError::NoCapacity)?;

        let session_id = Uuid::new_v4().to_string();
        let entry = Arc::new(SessionEntry {
            id: session_id.clone(),
            sandbox_id: checked_out.id,
            language,
            user_id: user_id.clone(),
            created_at: Instant::now(),
            exec_lock: AsyncMutex::new(()),
        });

        let mut inner = self.inner.lock().await;
        inner.sessions.insert(session_id.clone(), entry);
        inner.user_index.entry(user_id).or_default().insert(session_id.clone());

        tracing::info!(session_id = %session_id, %language, "session created");
        Ok(session_id)
    }

    pub async fn lookup(&self, session_id: &str) -> Option<Arc<SessionEntry>> {
        self.inner.lock().await.sessions.get(session_id).cloned()
    }

    /// Ends the session cleanly: reset the sandbox and return it to the
    /// pool's idle queue.
    pub async fn end(&self, session_id: &str) -> Result<(), ExecutionError> {
        let entry = self.remove(session_id).await?;
        self.pool
            .return_and_reset(crate::pool::CheckedOutSandbox {
                id: entry.sandbox_id,
                meta: crate::pool::SandboxMeta {
                    language: entry.language,
                    owning_session_id: Some(entry.id.clone()),
                    owning_user_id: Some(entry.user_id.clone()),
                    created_at: entry.created_at,
                },
            })
            .await;
        tracing::info!(session_id, "session ended");
        Ok(())
    }

    /// Ends a session whose sandbox is no longer trusted (a timed-out or
    /// failed execution): the sandbox is discarded outright rather than
    /// reset and returned.
    pub async fn end_discarding(&self, session_id: &str) -> Result<(), ExecutionError> {
        let entry = self.remove(session_id).await?;
        self.pool.discard(entry.sandbox_id).await;
        tracing::warn!(session_id, "session sandbox discarded after a possibly-dirty execution");
        Ok(())
    }

    /// Ends every session owned by `user_id`.
    pub async fn end_for_user(&self, user_id: &str) {
        let ids: Vec<String> = {
            let inner = self.inner.lock().await;
            inner
                .user_index
                .get(user_id)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        };
        for id in ids {
            let _ = self.end(&id).await;
        }
    }

    pub async fn count(&self) -> usize {
        self.inner.lock().await.sessions.len()
    }

    pub async fn sessions_for_user(&self, user_id: &str) -> HashSet<String> {
        self.inner
            .lock()
            .await
            .user_index
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Closes every session sandbox directly, without resetting or
    /// returning to the pool. Used by the lifecycle controller at shutdown.
    pub async fn close_all(&self, provider: &dyn sandbox_provider::SandboxProvider) {
        let entries: Vec<Arc<SessionEntry>> = {
            let mut inner = self.inner.lock().await;
            let entries = inner.sessions.drain().map(|(_, v)| v).collect();
            inner.user_index.clear();
            entries
        };
        for entry in entries {
            if let Err(e) = provider.close(entry.sandbox_id).await {
                tracing::warn!(error = %e, session_id = %entry.id, "error closing session sandbox on shutdown");
            }
        }
    }

    async fn remove(&self, session_id: &str) -> Result<Arc<SessionEntry>, ExecutionError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .sessions
            .remove(session_id)
            .ok_or_else(|| ExecutionError::SessionNotFound(session_id.to_string()))?;
        if let Some(set) = inner.user_index.get_mut(&entry.user_id) {
            set.remove(session_id);
            if set.is_empty() {
                inner.user_index.remove(&entry.user_id);
            }
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbox_provider::MockSandboxProvider;

    fn registry() -> (SessionRegistry, Arc<Pool>, Arc<MockSandboxProvider>) {
        let provider = Arc::new(MockSandboxProvider::new());
        let pool = Arc::new(Pool::new(provider.clone(), 5));
        (SessionRegistry::new(pool.clone()), pool, provider)
    }

    #[tokio::test]
    async fn create_then_end_restores_pool_and_live_count() {
        let (sessions, pool, _provider) = registry();
        let sid = sessions.create("alice".into(), Language::Python).await.unwrap();
        assert_eq!(pool.live_count().await, 1);
        assert_eq!(pool.idle_count().await, 0);

        sessions.end(&sid).await.unwrap();
        assert_eq!(pool.live_count().await, 1);
        assert_eq!(pool.idle_count().await, 1);
        assert_eq!(sessions.count().await, 0);
    }

    #[tokio::test]
    async fn end_unknown_session_is_not_found_and_state_is_unchanged() {
        let (sessions, pool, _provider) = registry();
        let err = sessions.end("does-not-exist").await;
        assert!(matches!(err, Err(ExecutionError::SessionNotFound(_))));
        assert_eq!(pool.live_count().await, 0);
    }

    #[tokio::test]
    async fn double_end_is_not_found_on_the_second_call() {
        let (sessions, _pool, _provider) = registry();
        let sid = sessions.create("bob".into(), Language::Bash).await.unwrap();
        sessions.end(&sid).await.unwrap();
        let second = sessions.end(&sid).await;
        assert!(matches!(second, Err(ExecutionError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn reverse_user_index_tracks_exactly_the_sessions_owned() {
        let (sessions, _pool, _provider) = registry();
        let s1 = sessions.create("carol".into(), Language::Python).await.unwrap();
        let s2 = sessions.create("carol".into(), Language::Node).await.unwrap();

        let owned = sessions.sessions_for_user("carol").await;
        assert_eq!(owned, HashSet::from([s1.clone(), s2.clone()]));

        sessions.end(&s1).await.unwrap();
        let owned = sessions.sessions_for_user("carol").await;
        assert_eq!(owned, HashSet::from([s2]));
    }

    #[tokio::test]
    async fn end_for_user_ends_every_session_they_own() {
        let (sessions, pool, _provider) = registry();
        sessions.create("dave".into(), Language::Python).await.unwrap();
        sessions.create("dave".into(), Language::Python).await.unwrap();
        assert_eq!(pool.live_count().await, 2);

        sessions.end_for_user("dave").await;
        assert_eq!(sessions.count().await, 0);
        assert_eq!(pool.idle_count().await, 2);
    }
}
