use super::LanguageHandler;
use async_trait::async_trait;
use sandbox_provider::{CommandOutput, ProviderError, SandboxId, SandboxProvider};

/// Invokes the provider's native Python entrypoint with `code` inlined.
/// No temp file involved.
pub struct PythonHandler;

#[async_trait]
impl LanguageHandler for PythonHandler {
    async fn execute(
        &self,
        provider: &dyn SandboxProvider,
        id: SandboxId,
        code: &str,
    ) -> Result<CommandOutput, ProviderError> {
        provider.run_native_interpreter(id, "python", code).await
    }
}
