//! Orchestrates one request end to end: pick a sandbox (session or pool),
//! optionally stage files, dispatch to a handler under a deadline, format
//! the result, and release the sandbox.

use crate::error::ExecutionError;
use crate::handlers::HandlerRegistry;
use crate::language::Language;
use crate::lifecycle::ReturnTracker;
use crate::pool::{CheckedOutSandbox, Pool};
use crate::session::SessionRegistry;
use sandbox_provider::{SandboxId, SandboxProvider};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A request to execute code, already normalised by the caller (timeout
/// clamping happens inside `execute`, but language canonicalisation has
/// NOT happened yet — that's this module's job, per spec).
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub execution_id: String,
    pub user_id: String,
    pub language: String,
    pub code: String,
    pub timeout_seconds: u64,
    pub session_id: Option<String>,
    /// Insertion-ordered `(path, content)` pairs; staging writes each in
    /// this order and aborts on the first failure.
    pub files: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ExecutionResponse {
    pub output: String,
    pub error: Option<String>,
    pub exit_code: i32,
    pub session_id: Option<String>,
    /// Set when a session-bound execution timed out or failed and the
    /// session was torn down transparently as a result.
    pub session_terminated: bool,
}

/// The Active Ephemeral Set: `ephemeral_id -> sandbox`, for executions in
/// flight without a session. Disjoint from the Pool and the Session
/// Registry by construction — a sandbox is inserted here only after
/// `Pool::checkout` hands it over, and removed before it is ever handed
/// back to the pool.
struct ActiveEphemeral {
    entries: Mutex<HashMap<String, CheckedOutSandbox>>,
}

pub struct Coordinator {
    pool: Arc<Pool>,
    sessions: Arc<SessionRegistry>,
    handlers: Arc<HandlerRegistry>,
    provider: Arc<dyn SandboxProvider>,
    allowed_languages: Vec<Language>,
    max_timeout: u64,
    ephemeral: ActiveEphemeral,
    returns: Arc<ReturnTracker>,
}

impl Coordinator {
    pub fn new(
        pool: Arc<Pool>,
        sessions: Arc<SessionRegistry>,
        handlers: Arc<HandlerRegistry>,
        provider: Arc<dyn SandboxProvider>,
        allowed_languages: Vec<Language>,
        max_timeout: u64,
        returns: Arc<ReturnTracker>,
    ) -> Self {
        Self {
            pool,
            sessions,
            handlers,
            provider,
            allowed_languages,
            max_timeout,
            ephemeral: ActiveEphemeral {
                entries: Mutex::new(HashMap::new()),
            },
            returns,
        }
    }

    pub async fn active_ephemeral_count(&self) -> usize {
        self.ephemeral.entries.lock().await.len()
    }

    /// Closes every sandbox currently checked out for an in-flight
    /// ephemeral execution, discarding it from the pool's live count. Used
    /// only during shutdown — an in-flight `execute` racing this will find
    /// its sandbox gone and surface a provider error, which is the bounded
    /// grace period's job to make rare in practice.
    pub async fn close_active_ephemeral(&self) {
        let drained: Vec<CheckedOutSandbox> = self.ephemeral.entries.lock().await.drain().map(|(_, v)| v).collect();
        for sandbox in drained {
            self.pool.discard(sandbox.id).await;
        }
    }

    pub async fn execute(&self, req: ExecutionRequest) -> Result<ExecutionResponse, ExecutionError> {
        let language = Language::canonicalize(&req.language, &self.allowed_languages)?;
        let timeout = clamp_timeout(req.timeout_seconds, self.max_timeout);

        match &req.session_id {
            Some(session_id) => self.execute_in_session(session_id, language, timeout, &req).await,
            None => self.execute_ephemeral(language, timeout, &req).await,
        }
    }

    async fn execute_ephemeral(
        &self,
        language: Language,
        timeout: Duration,
        req: &ExecutionRequest,
    ) -> Result<ExecutionResponse, ExecutionError> {
        let checked_out = self
            .pool
            .checkout(language)
            .await
            .map_err(|_| ExecutionError::NoCapacity)?;
        let sandbox_id = checked_out.id;
        let ephemeral_id = Uuid::new_v4().to_string();
        self.ephemeral
            .entries
            .lock()
            .await
            .insert(ephemeral_id.clone(), checked_out);

        let outcome = self.stage_and_run(sandbox_id, language, timeout, req).await;

        // Every ephemeral disposition — success, file-staging failure,
        // timeout, or handler error — resets and returns the sandbox; the
        // response is never delayed waiting for that to finish.
        let checked_out = self
            .ephemeral
            .entries
            .lock()
            .await
            .remove(&ephemeral_id)
            .expect("ephemeral entry inserted above is still present");
        self.spawn_background_return(checked_out);

        Ok(outcome.into_response(None))
    }

    async fn execute_in_session(
        &self,
        session_id: &str,
        _language: Language,
        timeout: Duration,
        req: &ExecutionRequest,
    ) -> Result<ExecutionResponse, ExecutionError> {
        let entry = self
            .sessions
            .lookup(session_id)
            .await
            .ok_or_else(|| ExecutionError::SessionNotFound(session_id.to_string()))?;

        let _guard = entry.exec_lock.lock().await;
        let outcome = self
            .stage_and_run(entry.sandbox_id, entry.language, timeout, req)
            .await;

        let terminated = match &outcome {
            Outcome::Timeout | Outcome::HandlerError(_) => {
                // Possibly dirty: the session is ended transparently rather
                // than left bound to a sandbox whose state we no longer trust.
                let _ = self.sessions.end_discarding(session_id).await;
                true
            }
            Outcome::Success(_) | Outcome::FileStagingError(_) => false,
        };

        Ok(outcome.into_response(Some((session_id.to_string(), terminated))))
    }

    async fn stage_and_run(
        &self,
        sandbox_id: SandboxId,
        language: Language,
        timeout: Duration,
        req: &ExecutionRequest,
    ) -> Outcome {
        for (path, content) in &req.files {
            if let Err(e) = self.provider.write_file(sandbox_id, path, content.as_bytes()).await {
                return Outcome::FileStagingError(e.to_string());
            }
        }

        let handler = self.handlers.get(language);
        let fut = handler.execute(self.provider.as_ref(), sandbox_id, &req.code);

        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(result)) => Outcome::Success(result),
            Ok(Err(e)) => Outcome::HandlerError(e.to_string()),
            Err(_elapsed) => Outcome::Timeout,
        }
    }

    fn spawn_background_return(&self, sandbox: CheckedOutSandbox) {
        let pool = self.pool.clone();
        let tracker = self.returns.clone();
        tracker.start();
        tokio::spawn(async move {
            pool.return_and_reset(sandbox).await;
            tracker.finish();
        });
    }
}

enum Outcome {
    Success(sandbox_provider::CommandOutput),
    FileStagingError(String),
    Timeout,
    HandlerError(String),
}

impl Outcome {
    fn into_response(self, session: Option<(String, bool)>) -> ExecutionResponse {
        let (session_id, session_terminated) = match session {
            Some((id, terminated)) => (Some(id), terminated),
            None => (None, false),
        };
        match self {
            Outcome::Success(result) => ExecutionResponse {
                output: result.stdout,
                error: if result.stderr.is_empty() { None } else { Some(result.stderr) },
                exit_code: result.exit_code,
                session_id,
                session_terminated,
            },
            Outcome::FileStagingError(msg) => ExecutionResponse {
                output: String::new(),
                error: Some(msg),
                exit_code: -1,
                session_id,
                session_terminated,
            },
            Outcome::Timeout => ExecutionResponse {
                output: String::new(),
                error: Some("Execution timed out".to_string()),
                exit_code: -1,
                session_id,
                session_terminated,
            },
            Outcome::HandlerError(msg) => ExecutionResponse {
                output: String::new(),
                error: Some(msg),
                exit_code: -1,
                session_id,
                session_terminated,
            },
        }
    }
}

fn clamp_timeout(requested: u64, max: u64) -> Duration {
    Duration::from_secs(requested.clamp(1, max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::HandlerRegistry;
    use crate::language::Language;
    use sandbox_provider::MockSandboxProvider;

    fn setup(max_pool: usize) -> (Coordinator, Arc<Pool>, Arc<SessionRegistry>, Arc<MockSandboxProvider>) {
        let provider = Arc::new(MockSandboxProvider::new());
        let pool = Arc::new(Pool::new(provider.clone(), max_pool));
        let sessions = Arc::new(SessionRegistry::new(pool.clone()));
        let handlers = Arc::new(HandlerRegistry::new());
        let returns = Arc::new(ReturnTracker::new());
        let coordinator = Coordinator::new(
            pool.clone(),
            sessions.clone(),
            handlers,
            provider.clone(),
            Language::ALL.to_vec(),
            300,
            returns,
        );
        (coordinator, pool, sessions, provider)
    }

    fn req(language: &str, code: &str, timeout: u64) -> ExecutionRequest {
        ExecutionRequest {
            execution_id: "exec-1".into(),
            user_id: "user-1".into(),
            language: language.into(),
            code: code.into(),
            timeout_seconds: timeout,
            session_id: None,
            files: Vec::new(),
        }
    }

    #[tokio::test]
    async fn python_ephemeral_happy_path() {
        let (coordinator, _pool, _sessions, _provider) = setup(5);
        let resp = coordinator.execute(req("python", "print(1+1)", 30)).await.unwrap();
        assert_eq!(resp.output, "2\n");
        assert!(resp.error.is_none());
        assert_eq!(resp.exit_code, 0);
    }

    #[tokio::test]
    async fn c_compile_failure_reports_compilation_error_marker() {
        let (coordinator, _pool, _sessions, _provider) = setup(5);
        let resp = coordinator
            .execute(req("c", "int main(){ return x; }", 30))
            .await
            .unwrap();
        assert_eq!(resp.output, "");
        assert!(resp.error.unwrap().starts_with("Compilation error:"));
        assert_ne!(resp.exit_code, 0);
    }

    #[tokio::test]
    async fn bash_with_staged_file() {
        let (coordinator, _pool, _sessions, _provider) = setup(5);
        let mut r = req("bash", "cat /tmp/in.txt", 10);
        r.files = vec![("/tmp/in.txt".to_string(), "hi".to_string())];
        let resp = coordinator.execute(r).await.unwrap();
        assert_eq!(resp.output, "hi");
        assert_eq!(resp.exit_code, 0);
    }

    #[tokio::test]
    async fn timeout_reports_negative_exit_code_and_does_not_leak_the_sandbox() {
        let (coordinator, pool, _sessions, _provider) = setup(1);
        let resp = coordinator
            .execute(req("python", "while True: pass", 1))
            .await
            .unwrap();
        assert_eq!(resp.output, "");
        assert_eq!(resp.error.as_deref(), Some("Execution timed out"));
        assert_eq!(resp.exit_code, -1);

        coordinator.returns.wait_idle().await;
        assert_eq!(pool.live_count().await, 1);
        assert_eq!(coordinator.active_ephemeral_count().await, 0);
    }

    #[tokio::test]
    async fn session_reuse_preserves_state_across_calls() {
        let (coordinator, _pool, sessions, _provider) = setup(5);
        let sid = sessions.create("user-1".into(), Language::Python).await.unwrap();

        let mut r1 = req("python", "x=5", 10);
        r1.session_id = Some(sid.clone());
        coordinator.execute(r1).await.unwrap();

        let mut r2 = req("python", "print(x)", 10);
        r2.session_id = Some(sid.clone());
        let resp = coordinator.execute(r2).await.unwrap();
        assert_eq!(resp.output, "5\n");

        sessions.end(&sid).await.unwrap();
        let second_end = sessions.end(&sid).await;
        assert!(matches!(second_end, Err(ExecutionError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn capacity_exhausted_by_a_session_rejects_a_new_ephemeral_execution() {
        let (coordinator, _pool, sessions, _provider) = setup(1);
        sessions.create("user-1".into(), Language::Python).await.unwrap();

        let err = coordinator.execute(req("python", "print(1)", 10)).await;
        assert!(matches!(err, Err(ExecutionError::NoCapacity)));
    }

    #[tokio::test]
    async fn unsupported_language_is_rejected_before_any_sandbox_is_acquired() {
        let (coordinator, pool, _sessions, _provider) = setup(5);
        let err = coordinator.execute(req("ruby", "puts 1", 10)).await;
        assert!(matches!(err, Err(ExecutionError::UnsupportedLanguage(_))));
        assert_eq!(pool.live_count().await, 0);
    }

    #[tokio::test]
    async fn session_timeout_tears_the_session_down_transparently() {
        let (coordinator, pool, sessions, _provider) = setup(5);
        let sid = sessions.create("user-1".into(), Language::Python).await.unwrap();

        let mut r = req("python", "while True: pass", 1);
        r.session_id = Some(sid.clone());
        let resp = coordinator.execute(r).await.unwrap();
        assert!(resp.session_terminated);
        assert_eq!(sessions.count().await, 0);
        assert_eq!(pool.live_count().await, 0);
    }
}
