//! Error taxonomy for the failover core.
//!
//! Each kind maps to one of the components in [`crate`]; only [`Fatal`]
//! variants are meant to terminate the process. Everything else is
//! recorded as an [`crate::event::Event`] by the caller and handled locally.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config at `{path}`: {message}")]
    Invalid { path: String, message: String },
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("interface `{0}` not found")]
    InterfaceNotFound(String),
    #[error("probe for `{member}` timed out")]
    ProbeTimeout { member: String },
    #[error("classification probe failed for `{member}`: {cause}")]
    ClassifyFailed { member: String, cause: String },
}

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("prober failed for `{member}`: {cause}")]
    ProberFailed { member: String, cause: String },
    #[error("class adapter failed for `{member}`: {cause}")]
    AdapterFailed { member: String, cause: String },
    #[error("collect for `{member}` exceeded deadline")]
    Deadline { member: String },
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("no eligible members present")]
    NoEligibleMembers,
    #[error("referenced member `{0}` not found")]
    UnknownMember(String),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("apply failed at stage `{stage}`: {cause}")]
    ApplyFailed { stage: String, cause: String },
    #[error("rollback failed after apply error: {0}")]
    RollbackFailed(String),
    #[error("reconcile failed: {0}")]
    ReconcileFailed(String),
}

#[derive(Debug, Error)]
pub enum TransientIo {
    #[error("operation timed out after {attempts} attempt(s)")]
    TimedOut { attempts: u32 },
    #[error("subprocess probe failed: {0}")]
    Subprocess(String),
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("unknown member `{0}`")]
    UnknownMember(String),
    #[error("busy: a decision is mid-apply")]
    Busy,
    #[error("internal error: {0}")]
    Internal(String),
    #[error("not ready")]
    NotReady,
}

impl RpcError {
    pub fn code(&self) -> u16 {
        match self {
            RpcError::InvalidArgs(_) => 400,
            RpcError::UnknownMember(_) => 404,
            RpcError::Busy => 409,
            RpcError::Internal(_) => 500,
            RpcError::NotReady => 503,
        }
    }
}

#[derive(Debug, Error)]
pub enum FatalError {
    #[error("telemetry ring allocation failed: {0}")]
    RingAllocation(String),
    #[error("terminating signal received")]
    Signal,
}
