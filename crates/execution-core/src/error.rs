//! Error taxonomy for the execution core.
//!
//! `UnsupportedLanguage`, `NoCapacity` and `SessionNotFound` propagate as
//! `Err` from [`crate::coordinator::Coordinator::execute`] and map to HTTP
//! errors at the service boundary. File-staging failures, timeouts and
//! provider/handler faults during a run are a different kind: they never
//! reach this enum at all, since the sandbox was still acquired
//! successfully — they're folded into a successful
//! [`crate::coordinator::ExecutionResponse`] with its `error` field set
//! instead, because the service boundary always answers `200` for them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("no sandbox capacity available")]
    NoCapacity,

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no sandbox capacity available")]
    NoCapacity,
}
