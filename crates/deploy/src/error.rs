//! Error taxonomy for the orchestration core.
//!
//! Configuration loading and the CLI use `anyhow`. Everything that can end up in a
//! [`RunReport`](crate::RunReport) is one of the typed variants below so the operator
//! output can tell a declaration-order bug apart from a reverted transaction.

use std::time::Duration;

/// Failure reported by an external deployment or call executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionFailure {
    /// A one-shot method was invoked on a component that already ran it.
    #[error("already initialized: {0}")]
    AlreadyInitialized(String),

    /// The network accepted the request but execution reverted.
    #[error("reverted: {0}")]
    Reverted(String),

    /// No confirmation was observed within the executor's bound.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// The endpoint could not be reached or answered garbage.
    #[error("transport error: {0}")]
    Transport(String),

    /// The request could not be built locally (missing artifact, bad argument type...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Errors produced by the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown network `{0}`")]
    UnknownNetwork(String),

    #[error("role `{role}` is not defined for network `{network}`")]
    UnknownRole { network: String, role: String },

    #[error("account for role `{role}` on network `{network}` cannot be resolved: {reason}")]
    InvalidAccount {
        network: String,
        role: String,
        reason: String,
    },

    #[error("registry conflict for `{name}` on `{network}`: {reason}")]
    Conflict {
        network: String,
        name: String,
        reason: String,
    },

    #[error("`{component}` has no deployed identity on `{network}`")]
    UnresolvedDependency { network: String, component: String },

    #[error("deployment of `{name}` ({contract_kind}) failed: {source}")]
    DeploymentFailed {
        name: String,
        contract_kind: String,
        #[source]
        source: ExecutionFailure,
    },

    #[error("call `{method}` on `{target}` failed: {source}")]
    CallFailed {
        target: String,
        method: String,
        #[source]
        source: ExecutionFailure,
    },

    #[error("deployment state at {path} is locked by another run")]
    Locked { path: String },

    #[error("deployment state persistence failed: {0}")]
    Persistence(String),
}

impl Error {
    /// Whether this error is a one-shot guard tripped by the target component.
    pub fn is_already_initialized(&self) -> bool {
        matches!(
            self,
            Error::CallFailed {
                source: ExecutionFailure::AlreadyInitialized(_),
                ..
            }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
