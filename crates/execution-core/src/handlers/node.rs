use super::LanguageHandler;
use async_trait::async_trait;
use sandbox_provider::{CommandOutput, ProviderError, SandboxId, SandboxProvider};
use uuid::Uuid;

/// Writes `code` to a per-execution-unique path under the scratch
/// directory, then runs `node <path>`.
pub struct NodeHandler;

#[async_trait]
impl LanguageHandler for NodeHandler {
    async fn execute(
        &self,
        provider: &dyn SandboxProvider,
        id: SandboxId,
        code: &str,
    ) -> Result<CommandOutput, ProviderError> {
        let path = format!("/tmp/exec-{}.js", Uuid::new_v4());
        provider.write_file(id, &path, code.as_bytes()).await?;
        provider.run_shell(id, &format!("node {path}")).await
    }
}
