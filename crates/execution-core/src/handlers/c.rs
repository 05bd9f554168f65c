use super::{LanguageHandler, COMPILATION_ERROR_MARKER};
use async_trait::async_trait;
use sandbox_provider::{CommandOutput, ProviderError, SandboxId, SandboxProvider};
use uuid::Uuid;

/// Writes source to a unique path, compiles with the system C compiler to
/// a sibling executable, and runs it. A non-zero compiler exit is
/// surfaced as a compilation error rather than executed.
pub struct CHandler;

#[async_trait]
impl LanguageHandler for CHandler {
    async fn execute(
        &self,
        provider: &dyn SandboxProvider,
        id: SandboxId,
        code: &str,
    ) -> Result<CommandOutput, ProviderError> {
        let token = Uuid::new_v4().simple().to_string();
        let source = format!("/tmp/program_{token}.c");
        let executable = format!("/tmp/program_{token}");

        provider.write_file(id, &source, code.as_bytes()).await?;

        let compile = provider.run_shell(id, &format!("cc -o {executable} {source}")).await?;
        if compile.exit_code != 0 {
            return Ok(CommandOutput {
                stdout: String::new(),
                stderr: format!("{COMPILATION_ERROR_MARKER}{}", compile.stderr),
                exit_code: compile.exit_code,
            });
        }

        provider.run_shell(id, &executable).await
    }
}
