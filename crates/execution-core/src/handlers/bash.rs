use super::LanguageHandler;
use async_trait::async_trait;
use sandbox_provider::{CommandOutput, ProviderError, SandboxId, SandboxProvider};

/// Runs `code` verbatim as a shell command string.
pub struct BashHandler;

#[async_trait]
impl LanguageHandler for BashHandler {
    async fn execute(
        &self,
        provider: &dyn SandboxProvider,
        id: SandboxId,
        code: &str,
    ) -> Result<CommandOutput, ProviderError> {
        provider.run_shell(id, code).await
    }
}
