//! Thin abstraction over an external sandbox-execution provider.
//!
//! `execution-core` never talks to the provider's wire protocol directly; it
//! only depends on the [`SandboxProvider`] trait and the opaque [`SandboxId`]
//! handle. This keeps the pool manager provider-agnostic and lets tests run
//! against [`mock::MockSandboxProvider`] instead of a live service.

mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use http::HttpSandboxProvider;

/// Opaque handle to a sandbox instance owned by the external provider.
///
/// Carries no metadata of its own — ownership, language and timestamps are
/// tracked by `execution-core` in a record keyed by this id, never by
/// mutating anything the provider returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxId(Uuid);

impl SandboxId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SandboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of running a shell command or a native interpreter invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// An opaque provider-side failure. The caller treats every variant as a
/// provider fault folded into a failed execution response, not as a
/// `Coordinator::execute` error; no retries happen at this layer.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("sandbox provider request failed: {0}")]
    Request(String),
    #[error("sandbox provider returned an error status: {0}")]
    Status(String),
    #[error("sandbox provider connection closed unexpectedly")]
    Disconnected,
}

/// Operations the provider adapter exposes. All operations are potentially
/// long-running and may suspend; none retry internally.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a new, generic sandbox instance.
    async fn create(&self) -> Result<SandboxId, ProviderError>;

    /// Write a file into the sandbox's filesystem.
    async fn write_file(&self, id: SandboxId, path: &str, content: &[u8]) -> Result<(), ProviderError>;

    /// Run an arbitrary shell command string inside the sandbox.
    async fn run_shell(&self, id: SandboxId, cmd: &str) -> Result<CommandOutput, ProviderError>;

    /// Invoke the sandbox's native interpreter for `language` on `code`
    /// directly (no temp file), where the provider supports it.
    async fn run_native_interpreter(
        &self,
        id: SandboxId,
        language: &str,
        code: &str,
    ) -> Result<CommandOutput, ProviderError>;

    /// Tear the sandbox down. Idempotent from the caller's point of view:
    /// closing an already-closed id is a caller bug, not guarded against
    /// here (the core never does it — see `Sandbox` state invariant).
    async fn close(&self, id: SandboxId) -> Result<(), ProviderError>;
}
