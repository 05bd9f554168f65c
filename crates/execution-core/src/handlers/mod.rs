//! Language handler registry: maps a canonical [`Language`] to a strategy
//! that, given a sandbox, produces a result.

mod bash;
mod c;
mod node;
mod python;

use crate::language::Language;
use async_trait::async_trait;
use sandbox_provider::{CommandOutput, ProviderError, SandboxId, SandboxProvider};
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait LanguageHandler: Send + Sync {
    async fn execute(
        &self,
        provider: &dyn SandboxProvider,
        id: SandboxId,
        code: &str,
    ) -> Result<CommandOutput, ProviderError>;
}

/// Registry seeded at process start with one handler per canonical
/// language. Aliases never reach this type — they are collapsed by
/// [`Language::canonicalize`] before a handler is looked up.
pub struct HandlerRegistry {
    handlers: HashMap<Language, Arc<dyn LanguageHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        let mut handlers: HashMap<Language, Arc<dyn LanguageHandler>> = HashMap::new();
        handlers.insert(Language::Python, Arc::new(python::PythonHandler));
        handlers.insert(Language::Node, Arc::new(node::NodeHandler));
        handlers.insert(Language::Bash, Arc::new(bash::BashHandler));
        handlers.insert(Language::C, Arc::new(c::CHandler));
        Self { handlers }
    }

    pub fn get(&self, language: Language) -> Arc<dyn LanguageHandler> {
        self.handlers
            .get(&language)
            .cloned()
            .unwrap_or_else(|| unreachable!("every canonical language has a registered handler"))
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Marker prefix surfaced in `stderr` when a C compilation fails, so callers
/// can distinguish a compile error from a runtime failure without parsing
/// compiler output.
pub const COMPILATION_ERROR_MARKER: &str = "Compilation error:\n";
