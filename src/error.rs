//! Error kinds for the `llmist` runtime.
//!
//! These map directly onto the error kinds in the agent-loop error handling
//! design: per-call errors that are fed back to the model as text, and
//! run-terminating errors that propagate to the caller.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The error kinds a gadget call or an agent run can fail with.
///
/// Parse-level and dependency-level kinds are carried on a `GadgetCall` or
/// tree node rather than thrown; they become `Error` values only when a
/// caller needs to propagate them (e.g. the HTTP provider, or a gadget's
/// `execute` returning `Err`).
#[derive(Debug, Error)]
pub enum Error {
    #[error("duplicate parameter path: {0}")]
    ParseDuplicatePointer(String),

    #[error("array index gap at {path}: expected {expected}, got {got}")]
    ParseArrayGap {
        path: String,
        expected: usize,
        got: usize,
    },

    #[error("type conflict at {path}: expected {expected}, found {found}")]
    ParseTypeConflict {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("unknown gadget: {0}")]
    UnknownGadget(String),

    #[error("dependency cycle detected among: {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("unknown dependency {dep} referenced by {invocation_id}")]
    UnknownDependency { invocation_id: String, dep: String },

    #[error("gadget '{name}' ({invocation_id}) timed out after {timeout_ms}ms")]
    GadgetTimeout {
        name: String,
        invocation_id: String,
        timeout_ms: u64,
    },

    #[error("gadget '{name}' ({invocation_id}) threw: {message}")]
    GadgetThrew {
        name: String,
        invocation_id: String,
        message: String,
    },

    #[error("LLM stream error: {0}")]
    LlmStreamError(String),

    #[error("LLM authentication failed: {0}")]
    LlmAuth(String),

    #[error("LLM rate limited: {0}")]
    LlmRateLimited(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("subagent depth ceiling ({0}) exceeded")]
    SubagentDepthExceeded(usize),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("environment error: {0}")]
    Env(#[from] std::env::VarError),
}

impl Error {
    /// Whether the agent loop may retry this error once, per the spec's
    /// single-retry policy for stream/rate-limit failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::LlmStreamError(_) | Error::LlmRateLimited(_))
    }

    /// Whether this error kind is a per-call failure that should be surfaced
    /// to the model as result text rather than terminating the run.
    pub fn is_call_level(&self) -> bool {
        matches!(
            self,
            Error::ParseDuplicatePointer(_)
                | Error::ParseArrayGap { .. }
                | Error::ParseTypeConflict { .. }
                | Error::UnknownGadget(_)
                | Error::DependencyCycle(_)
                | Error::UnknownDependency { .. }
                | Error::GadgetTimeout { .. }
                | Error::GadgetThrew { .. }
        )
    }
}
