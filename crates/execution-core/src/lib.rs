//! Sandbox-pool manager for the Execution Service: owns the pool of
//! pre-warmed sandboxes, the session registry, and the coordinator that
//! turns one execution request into a provider call and a disposition.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod handlers;
pub mod language;
pub mod lifecycle;
pub mod pool;
pub mod session;

pub use config::{Config, ConfigError};
pub use coordinator::{Coordinator, ExecutionRequest, ExecutionResponse};
pub use error::ExecutionError;
pub use language::Language;
pub use lifecycle::{LifecycleController, ReturnTracker};
pub use pool::Pool;
pub use session::SessionRegistry;

use handlers::HandlerRegistry;
use sandbox_provider::SandboxProvider;
use std::sync::Arc;

/// Wires the pool, session registry, handler registry, coordinator, and
/// lifecycle controller into the one object the service boundary needs.
/// Construction never talks to the provider; call [`Engine::start`] once
/// the HTTP listener is ready to begin accepting traffic.
pub struct Engine {
    pub coordinator: Arc<Coordinator>,
    pub sessions: Arc<SessionRegistry>,
    pub pool: Arc<Pool>,
    pub lifecycle: Arc<LifecycleController>,
    pub config: Config,
}

impl Engine {
    pub fn new(provider: Arc<dyn SandboxProvider>, config: Config) -> Self {
        let pool = Arc::new(Pool::new(provider.clone(), config.max_pool_size));
        let sessions = Arc::new(SessionRegistry::new(pool.clone()));
        let handlers = Arc::new(HandlerRegistry::new());
        let returns = Arc::new(ReturnTracker::new());

        let coordinator = Arc::new(Coordinator::new(
            pool.clone(),
            sessions.clone(),
            handlers,
            provider.clone(),
            config.supported_languages.clone(),
            config.max_timeout.as_secs(),
            returns.clone(),
        ));

        let lifecycle = Arc::new(LifecycleController::new(
            pool.clone(),
            sessions.clone(),
            provider,
            config.supported_languages.clone(),
            config.initial_pool_size,
            returns,
        ));

        Self {
            coordinator,
            sessions,
            pool,
            lifecycle,
            config,
        }
    }

    /// Pre-warms the pool. Call once at process startup, before serving
    /// traffic.
    pub async fn start(&self) {
        self.lifecycle.prewarm().await;
    }

    /// Closes every sandbox the engine knows about. Idempotent.
    pub async fn shutdown(&self, grace: std::time::Duration) {
        self.lifecycle.shutdown(&self.coordinator, grace).await;
    }
}
