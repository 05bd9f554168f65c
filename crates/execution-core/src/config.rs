//! Environment-driven configuration, validated once at startup.

use crate::language::Language;
use std::env;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_INITIAL_POOL_SIZE: usize = 5;
const DEFAULT_MAX_POOL_SIZE: usize = 20;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SUPPORTED_LANGUAGES: &str = "python,node,bash,c";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("INTERNAL_AUTH_TOKEN must be set and non-empty")]
    MissingAuthToken,

    #[error("{0} must be a positive integer, got {1:?}")]
    InvalidInteger(&'static str, String),

    #[error("SUPPORTED_LANGUAGES names an unknown language: {0}")]
    UnknownLanguage(String),

    #[error("SUPPORTED_LANGUAGES must name at least one language")]
    NoLanguages,

    #[error("MAX_POOL_SIZE ({max}) must be >= INITIAL_POOL_SIZE ({initial})")]
    PoolSizeInverted { initial: usize, max: usize },

    #[error("DEFAULT_TIMEOUT ({default}) must be <= MAX_TIMEOUT ({max})")]
    TimeoutInverted { default: u64, max: u64 },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub internal_auth_token: String,
    pub initial_pool_size: usize,
    pub max_pool_size: usize,
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub supported_languages: Vec<Language>,
}

impl Config {
    /// Reads and validates configuration from the process environment.
    /// Fails closed: an unset auth token, an unparsable integer, or an
    /// unknown language tag in `SUPPORTED_LANGUAGES` refuses to start
    /// rather than falling back to a guessed default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let internal_auth_token = env::var("INTERNAL_AUTH_TOKEN").unwrap_or_default();
        if internal_auth_token.is_empty() {
            return Err(ConfigError::MissingAuthToken);
        }

        let initial_pool_size = parse_env_or("INITIAL_POOL_SIZE", DEFAULT_INITIAL_POOL_SIZE)?;
        let max_pool_size = parse_env_or("MAX_POOL_SIZE", DEFAULT_MAX_POOL_SIZE)?;
        if max_pool_size < initial_pool_size {
            return Err(ConfigError::PoolSizeInverted {
                initial: initial_pool_size,
                max: max_pool_size,
            });
        }

        let default_timeout_secs = parse_env_or("DEFAULT_TIMEOUT", DEFAULT_TIMEOUT_SECS)?;
        let max_timeout_secs = parse_env_or("MAX_TIMEOUT", DEFAULT_MAX_TIMEOUT_SECS)?;
        if default_timeout_secs > max_timeout_secs {
            return Err(ConfigError::TimeoutInverted {
                default: default_timeout_secs,
                max: max_timeout_secs,
            });
        }

        let raw_languages =
            env::var("SUPPORTED_LANGUAGES").unwrap_or_else(|_| DEFAULT_SUPPORTED_LANGUAGES.to_string());
        let supported_languages = parse_languages(&raw_languages)?;

        Ok(Self {
            internal_auth_token,
            initial_pool_size,
            max_pool_size,
            default_timeout: Duration::from_secs(default_timeout_secs),
            max_timeout: Duration::from_secs(max_timeout_secs),
            supported_languages,
        })
    }
}

fn parse_env_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + Copy,
{
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidInteger(key, raw)),
    }
}

fn parse_languages(raw: &str) -> Result<Vec<Language>, ConfigError> {
    let mut languages = Vec::new();
    for tag in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let language = Language::canonicalize(tag, &Language::ALL)
            .map_err(|_| ConfigError::UnknownLanguage(tag.to_string()))?;
        if !languages.contains(&language) {
            languages.push(language);
        }
    }
    if languages.is_empty() {
        return Err(ConfigError::NoLanguages);
    }
    Ok(languages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_languages_dedupes_aliases_to_the_same_canonical_tag() {
        let languages = parse_languages("python, javascript, node, bash").unwrap();
        assert_eq!(languages, vec![Language::Python, Language::Node, Language::Bash]);
    }

    #[test]
    fn parse_languages_rejects_unknown_tags() {
        assert!(matches!(parse_languages("python,ruby"), Err(ConfigError::UnknownLanguage(tag)) if tag == "ruby"));
    }

    #[test]
    fn parse_languages_rejects_an_empty_list() {
        assert!(matches!(parse_languages(""), Err(ConfigError::NoLanguages)));
    }
}
