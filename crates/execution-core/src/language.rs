//! Canonical language tags and alias collapsing.
//!
//! Canonicalisation happens exactly once, at request ingress
//! (`Coordinator::execute`, `SessionRegistry::create`); everything
//! downstream — the Pool, the Handler Registry — only ever sees a
//! [`Language`] value, never a raw string.

use crate::error::ExecutionError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Node,
    Bash,
    C,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::Python, Language::Node, Language::Bash, Language::C];

    pub fn canonical_name(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Node => "node",
            Language::Bash => "bash",
            Language::C => "c",
        }
    }

    /// Resolve a raw request tag against `allowed` (the configured
    /// allow-list), collapsing aliases (`javascript -> node`, `shell ->
    /// bash`) first. An unknown or un-aliased tag fails `UnsupportedLanguage`
    /// before any sandbox is acquired.
    pub fn canonicalize(raw: &str, allowed: &[Language]) -> Result<Language, ExecutionError> {
        let lang = match raw {
            "python" => Language::Python,
            "node" | "javascript" => Language::Node,
            "bash" | "shell" => Language::Bash,
            "c" => Language::C,
            other => return Err(ExecutionError::UnsupportedLanguage(other.to_string())),
        };
        if allowed.contains(&lang) {
            Ok(lang)
        } else {
            Err(ExecutionError::UnsupportedLanguage(raw.to_string()))
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_collapse_to_canonical() {
        assert_eq!(Language::canonicalize("javascript", &Language::ALL).unwrap(), Language::Node);
        assert_eq!(Language::canonicalize("shell", &Language::ALL).unwrap(), Language::Bash);
    }

    #[test]
    fn unknown_language_is_rejected() {
        assert!(Language::canonicalize("ruby", &Language::ALL).is_err());
    }

    #[test]
    fn tag_outside_allow_list_is_rejected_even_if_known() {
        let restricted = [Language::Python];
        assert!(Language::canonicalize("bash", &restricted).is_err());
    }
}
